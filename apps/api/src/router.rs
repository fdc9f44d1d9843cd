use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use appointment_cell::{appointment_routes, AppointmentState, ChangeFeed};
use auth_cell::router::auth_routes;
use dashboard_cell::dashboard_routes;
use doctor_cell::router::doctor_routes;
use patient_cell::create_patient_router;
use shared_config::AppConfig;

pub fn create_router(config: Arc<AppConfig>, changes: ChangeFeed) -> Router {
    let appointment_state = AppointmentState::new(config.clone(), changes);

    Router::new()
        .route("/", get(|| async { "Clinic Desk API is running!" }))
        .nest("/auth", auth_routes(config.clone()))
        .nest("/patients", create_patient_router(config.clone()))
        .nest("/doctors", doctor_routes(config))
        .nest("/appointments", appointment_routes(appointment_state.clone()))
        .nest("/dashboard", dashboard_routes(appointment_state))
}
