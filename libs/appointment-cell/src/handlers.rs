// libs/appointment-cell/src/handlers.rs
use axum::{
    body::Bytes,
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use ring::constant_time;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use auth_cell::ProfileService;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AppointmentQuery, ConflictCheckQuery, CreateAppointmentRequest, StatusUpdateRequest,
    UpdateAppointmentRequest,
};
use crate::services::booking::AppointmentBookingService;
use crate::services::lifecycle::StatusPolicy;
use crate::services::notification::RescheduleNotifier;
use crate::services::realtime::DatabaseWebhookPayload;
use crate::AppointmentState;

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let token = auth.token();
    let profile = ProfileService::new(&state.config).get_profile(&user.id, token).await?;

    let appointment = AppointmentBookingService::new(&state.config, state.changes.clone())
        .create_appointment(&profile, request, token)
        .await?;

    Ok((StatusCode::CREATED, Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment booked successfully"
    }))))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<AppointmentQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = AppointmentBookingService::new(&state.config, state.changes.clone())
        .list_appointments(&query, auth.token())
        .await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let profile = ProfileService::new(&state.config).get_profile(&user.id, token).await?;

    let booking_service = AppointmentBookingService::new(&state.config, state.changes.clone());
    let details = booking_service.get_appointment(appointment_id, token).await?;

    let queue = if profile.acts_as_doctor(details.appointment.doctor_id) {
        Some(booking_service.get_queue_snapshot(
            details.appointment.doctor_id,
            details.appointment.appointment_date,
            token,
        ).await?)
    } else {
        None
    };
    let available_actions = StatusPolicy::available_actions(&profile, &details.appointment, queue.as_ref());

    Ok(Json(json!({
        "appointment": details,
        "available_actions": available_actions
    })))
}

#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let profile = ProfileService::new(&state.config).get_profile(&user.id, token).await?;

    let appointment = AppointmentBookingService::new(&state.config, state.changes.clone())
        .update_appointment(&profile, appointment_id, request, token)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment updated successfully"
    })))
}

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let profile = ProfileService::new(&state.config).get_profile(&user.id, token).await?;

    let appointment = AppointmentBookingService::new(&state.config, state.changes.clone())
        .transition_status(&profile, appointment_id, request.status, token)
        .await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": format!("Appointment is now {}", appointment.status)
    })))
}

#[axum::debug_handler]
pub async fn check_appointment_conflicts(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<ConflictCheckQuery>,
) -> Result<Json<Value>, AppError> {
    let response = AppointmentBookingService::new(&state.config, state.changes.clone())
        .check_conflicts(
            query.doctor_id,
            query.date,
            query.time,
            query.exclude_appointment_id,
            auth.token(),
        )
        .await?;

    Ok(Json(json!(response)))
}

// ==============================================================================
// RESCHEDULE NOTIFICATION
// ==============================================================================

#[axum::debug_handler]
pub async fn request_reschedule(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    ProfileService::new(&state.config).require_nurse(&user.id, token).await?;

    let details = AppointmentBookingService::new(&state.config, state.changes.clone())
        .get_appointment(appointment_id, token)
        .await?;

    let payload = RescheduleNotifier::new(&state.config)
        .request_reschedule(&details)
        .await?;

    Ok(Json(json!({
        "success": true,
        "notification": payload,
        "message": "Reschedule request sent"
    })))
}

// ==============================================================================
// CHANGE INGESTION
// ==============================================================================

/// Receives database webhooks from the data store and re-publishes
/// appointment changes to connected dashboards.
pub async fn ingest_change(
    State(state): State<AppointmentState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    if !state.config.is_change_ingestion_configured() {
        warn!("Database webhook received but ingestion is not configured");
        return Err(AppError::Forbidden("Change ingestion is disabled".to_string()));
    }

    let secret = headers
        .get(WEBHOOK_SECRET_HEADER)
        .map(|value| value.as_bytes())
        .unwrap_or_default();

    if constant_time::verify_slices_are_equal(secret, state.config.supabase_webhook_secret.as_bytes()).is_err() {
        warn!("Database webhook rejected: bad or missing secret");
        return Err(AppError::Auth("Invalid webhook secret".to_string()));
    }

    let payload: DatabaseWebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid webhook payload: {}", e)))?;

    debug!("Database webhook: {} on {}", payload.event_type, payload.table);

    let published = match payload.into_change() {
        Some(change) => {
            let receivers = state.changes.publish(change);
            info!("Ingested appointment change delivered to {} subscribers", receivers);
            true
        }
        None => false,
    };

    Ok(Json(json!({ "published": published })))
}
