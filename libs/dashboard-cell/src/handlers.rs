use std::time::Duration;

use axum::{
    extract::{Extension, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use axum_extra::TypedHeader;
use futures::{Stream, StreamExt};
use headers::{authorization::Bearer, Authorization};
use tracing::info;

use appointment_cell::AppointmentState;
use auth_cell::ProfileService;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AppointmentFilter, DashboardView, DoctorDashboardQuery, DoctorQueue, NurseDashboard,
    StreamQuery, DOCTOR_POLL_INTERVAL_SECONDS,
};
use crate::services::stream::{dashboard_events, StreamScope};
use crate::services::views::DashboardService;

#[axum::debug_handler]
pub async fn nurse_dashboard(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(filter): Query<AppointmentFilter>,
) -> Result<Json<NurseDashboard>, AppError> {
    let token = auth.token();
    let profile = ProfileService::new(&state.config).get_profile(&user.id, token).await?;

    let dashboard = DashboardService::new(&state.config, state.changes.clone())
        .nurse_view(&profile, &filter, token)
        .await?;

    Ok(Json(dashboard))
}

#[axum::debug_handler]
pub async fn doctor_dashboard(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<DoctorDashboardQuery>,
) -> Result<Json<DoctorQueue>, AppError> {
    let token = auth.token();
    let profile = ProfileService::new(&state.config).get_profile(&user.id, token).await?;

    let queue = DashboardService::new(&state.config, state.changes.clone())
        .doctor_queue(&profile, query.date, token)
        .await?;

    Ok(Json(queue))
}

/// Server-sent events telling a dashboard when to re-fetch.
pub async fn dashboard_stream(
    State(state): State<AppointmentState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let profile = ProfileService::new(&state.config).get_profile(&user.id, auth.token()).await?;

    let (scope, poll_every) = match query.view {
        DashboardView::Nurse => (
            StreamScope { doctor_id: query.doctor_id, date: query.date },
            None,
        ),
        DashboardView::Doctor => {
            let doctor_id = profile
                .doctor_id
                .filter(|_| profile.is_doctor())
                .ok_or_else(|| AppError::Forbidden("Only doctors can follow a doctor queue".to_string()))?;
            (
                StreamScope { doctor_id: Some(doctor_id), date: query.date },
                Some(Duration::from_secs(DOCTOR_POLL_INTERVAL_SECONDS)),
            )
        }
    };

    info!("User {} subscribed to {:?} dashboard updates", user.id, query.view);

    let events = dashboard_events(state.changes.subscribe(), scope, poll_every)
        .map(|event| Event::default().event(event.name()).json_data(&event));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
