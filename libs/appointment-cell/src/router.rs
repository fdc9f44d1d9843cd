// libs/appointment-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::AppointmentState;

pub fn appointment_routes(state: AppointmentState) -> Router {
    let protected_routes = Router::new()
        .route("/", post(handlers::create_appointment).get(handlers::list_appointments))
        .route("/conflicts/check", get(handlers::check_appointment_conflicts))
        .route("/{appointment_id}", get(handlers::get_appointment).put(handlers::update_appointment))
        .route("/{appointment_id}/status", patch(handlers::update_appointment_status))
        .route("/{appointment_id}/reschedule-request", post(handlers::request_reschedule))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    // Called by the data store, authenticated by the shared webhook secret.
    let webhook_routes = Router::new()
        .route("/changes", post(handlers::ingest_change));

    Router::new()
        .merge(protected_routes)
        .merge(webhook_routes)
        .with_state(state)
}
