use std::sync::Arc;
use axum::{
    extract::{Path, Query, State, Extension},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use serde_json::{json, Value};
use uuid::Uuid;

use auth_cell::ProfileService;
use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{CreatePatientRequest, UpdatePatientRequest, PatientSearchQuery};
use crate::services::PatientService;

#[axum::debug_handler]
pub async fn create_patient(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreatePatientRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    ProfileService::new(&config).require_nurse(&user.id, auth.token()).await?;

    let patient = PatientService::new(&config)
        .create_patient(request, auth.token())
        .await?;

    Ok((StatusCode::CREATED, Json(json!(patient))))
}

#[axum::debug_handler]
pub async fn get_patient(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let patient = PatientService::new(&config)
        .get_patient(patient_id, auth.token())
        .await?;

    Ok(Json(json!(patient)))
}

#[axum::debug_handler]
pub async fn update_patient(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Path(patient_id): Path<Uuid>,
    Json(request): Json<UpdatePatientRequest>,
) -> Result<Json<Value>, AppError> {
    ProfileService::new(&config).require_nurse(&user.id, auth.token()).await?;

    let patient = PatientService::new(&config)
        .update_patient(patient_id, request, auth.token())
        .await?;

    Ok(Json(json!(patient)))
}

#[axum::debug_handler]
pub async fn search_patients(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<PatientSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let patients = PatientService::new(&config)
        .search_patients(query, auth.token())
        .await?;

    Ok(Json(json!({
        "patients": patients,
        "total": patients.len()
    })))
}
