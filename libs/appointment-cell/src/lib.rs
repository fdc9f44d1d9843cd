use std::sync::Arc;

use shared_config::AppConfig;

pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::*;
pub use router::appointment_routes;
pub use services::booking::AppointmentBookingService;
pub use services::realtime::{AppointmentChange, ChangeFeed};

/// Shared by the appointment and dashboard routers.
#[derive(Clone)]
pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub changes: ChangeFeed,
}

impl AppointmentState {
    pub fn new(config: Arc<AppConfig>, changes: ChangeFeed) -> Self {
        Self { config, changes }
    }
}
