use chrono::{Local, NaiveDate};
use tracing::{debug, warn};

use appointment_cell::models::{AppointmentDetails, AppointmentQuery};
use appointment_cell::services::lifecycle::{QueueSnapshot, StatusPolicy};
use appointment_cell::{AppointmentBookingService, ChangeFeed};
use shared_config::AppConfig;
use shared_models::error::AppError;
use shared_models::staff::UserProfile;

use crate::models::{AppointmentFilter, DashboardRow, DoctorQueue, NurseDashboard};

pub struct DashboardService {
    booking_service: AppointmentBookingService,
}

impl DashboardService {
    pub fn new(config: &AppConfig, changes: ChangeFeed) -> Self {
        Self {
            booking_service: AppointmentBookingService::new(config, changes),
        }
    }

    pub async fn nurse_view(
        &self,
        profile: &UserProfile,
        filter: &AppointmentFilter,
        auth_token: &str,
    ) -> Result<NurseDashboard, AppError> {
        if !profile.is_nurse() {
            warn!("User {} ({}) requested the nurse dashboard", profile.id, profile.position);
            return Err(AppError::Forbidden("Only nurses can open the nurse dashboard".to_string()));
        }

        debug!("Building nurse dashboard with filter: {:?}", filter);

        let query = AppointmentQuery {
            doctor_id: filter.doctor_id,
            date: filter.date,
            ..Default::default()
        };
        let fetched = self.booking_service.list_appointments(&query, auth_token).await?;

        let rows = fetched
            .into_iter()
            .filter(|details| filter.matches(details))
            .map(|details| Self::row(profile, details, None))
            .collect();

        Ok(NurseDashboard::new(rows))
    }

    /// The calling doctor's queue for `date` (today when omitted).
    pub async fn doctor_queue(
        &self,
        profile: &UserProfile,
        date: Option<NaiveDate>,
        auth_token: &str,
    ) -> Result<DoctorQueue, AppError> {
        let doctor_id = profile
            .doctor_id
            .filter(|_| profile.is_doctor())
            .ok_or_else(|| {
                warn!("User {} ({}) requested a doctor queue", profile.id, profile.position);
                AppError::Forbidden("Only doctors have a consultation queue".to_string())
            })?;
        let date = date.unwrap_or_else(|| Local::now().date_naive());

        debug!("Building queue for doctor {} on {}", doctor_id, date);

        let query = AppointmentQuery {
            doctor_id: Some(doctor_id),
            date: Some(date),
            ..Default::default()
        };
        let day = self.booking_service.list_appointments(&query, auth_token).await?;

        let appointments: Vec<_> = day.iter().map(|details| details.appointment.clone()).collect();
        let snapshot = QueueSnapshot::from_day(&appointments);

        let rows = day
            .into_iter()
            .map(|details| Self::row(profile, details, Some(&snapshot)))
            .collect();

        Ok(DoctorQueue::build(doctor_id, date, &snapshot, rows))
    }

    fn row(profile: &UserProfile, details: AppointmentDetails, queue: Option<&QueueSnapshot>) -> DashboardRow {
        let available_actions = StatusPolicy::available_actions(profile, &details.appointment, queue);
        DashboardRow { details, available_actions }
    }
}
