use axum::{middleware, routing::get, Router};

use appointment_cell::AppointmentState;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn dashboard_routes(state: AppointmentState) -> Router {
    Router::new()
        .route("/nurse", get(handlers::nurse_dashboard))
        .route("/doctor", get(handlers::doctor_dashboard))
        .route("/stream", get(handlers::dashboard_stream))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware))
        .with_state(state)
}
