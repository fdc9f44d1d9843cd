use std::sync::Arc;

use axum::{
    extract::{Extension, State},
    http::HeaderMap,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::debug;

use shared_config::AppConfig;
use shared_models::auth::{TokenResponse, User};
use shared_models::error::AppError;
use shared_utils::extractor::bearer_token;
use shared_utils::jwt;

use crate::services::profile::ProfileService;

pub async fn validate_token(
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, AppError> {
    debug!("Validating token");

    let token = bearer_token(&headers)?;
    let user = jwt::validate_token(token, &config.supabase_jwt_secret)
        .map_err(|e| AppError::Auth(e.to_string()))?;

    Ok(Json(TokenResponse {
        valid: true,
        user_id: user.id,
        email: user.email,
        role: user.role,
    }))
}

/// Returns the caller's staff profile (position and linked doctor).
#[axum::debug_handler]
pub async fn get_me(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    debug!("Getting staff profile for user: {}", user.id);

    let profile = ProfileService::new(&config)
        .get_profile(&user.id, auth.token())
        .await?;

    Ok(Json(json!({
        "user_id": user.id,
        "email": user.email,
        "profile": profile
    })))
}
