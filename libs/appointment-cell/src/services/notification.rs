use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use shared_config::AppConfig;

use crate::models::{clock_time, AppointmentDetails, AppointmentError};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Body posted to the messaging webhook when a nurse asks for a reschedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReschedulePayload {
    pub doctor_name: String,
    pub patient_first_name: String,
    pub patient_last_name: String,
    /// `YYYY-MM-DD`
    pub appointment_date: String,
    /// `HH:MM`
    pub appointment_time: String,
}

impl ReschedulePayload {
    pub fn from_details(details: &AppointmentDetails) -> Self {
        let (first_name, last_name) = details
            .patient
            .as_ref()
            .map(|p| (p.first_name.clone(), p.last_name.clone()))
            .unwrap_or_default();

        Self {
            doctor_name: details.doctor_name().unwrap_or_default().to_string(),
            patient_first_name: first_name,
            patient_last_name: last_name,
            appointment_date: details.appointment.appointment_date.format("%Y-%m-%d").to_string(),
            appointment_time: clock_time::format(&details.appointment.appointment_time),
        }
    }
}

pub struct RescheduleNotifier {
    client: Client,
    webhook_url: Option<String>,
}

impl RescheduleNotifier {
    pub fn new(config: &AppConfig) -> Self {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client,
            webhook_url: config
                .is_reschedule_webhook_configured()
                .then(|| config.reschedule_webhook_url.clone()),
        }
    }

    /// Fires the webhook once. Delivery to the patient is the receiver's job.
    pub async fn request_reschedule(
        &self,
        details: &AppointmentDetails,
    ) -> Result<ReschedulePayload, AppointmentError> {
        let url = self.webhook_url.as_deref().ok_or_else(|| {
            warn!("Reschedule requested for {} but no webhook is configured", details.appointment.id);
            AppointmentError::NotConfigured("Reschedule webhook".to_string())
        })?;

        let payload = ReschedulePayload::from_details(details);

        let response = self.client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                error!("Reschedule webhook unreachable: {}", e);
                AppointmentError::NotificationFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Reschedule webhook returned {}: {}", status, body);
            return Err(AppointmentError::NotificationFailed(format!(
                "Webhook responded with status {}", status
            )));
        }

        info!("Reschedule request sent for appointment {}", details.appointment.id);
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn details() -> AppointmentDetails {
        let patient = MockSupabaseResponses::patient_response(
            "7b1c8b0e-6a44-4d0b-9a59-111111111111", "Aziz", "Karimov",
        );
        let doctor = MockSupabaseResponses::doctor_response(
            "7b1c8b0e-6a44-4d0b-9a59-222222222222", "Dr. Aliyev", Some("Cardiology"),
        );
        let row = MockSupabaseResponses::appointment_details_response(
            "7b1c8b0e-6a44-4d0b-9a59-333333333333",
            patient,
            doctor,
            "2024-05-01",
            "09:05:00",
            "scheduled",
        );
        serde_json::from_value(row).unwrap()
    }

    fn notifier_for(url: &str) -> RescheduleNotifier {
        let mut config = TestConfig::default();
        config.reschedule_webhook_url = url.to_string();
        RescheduleNotifier::new(&config.to_app_config())
    }

    #[test]
    fn test_payload_formats_date_and_time() {
        let payload = ReschedulePayload::from_details(&details());
        assert_eq!(payload.doctor_name, "Dr. Aliyev");
        assert_eq!(payload.patient_first_name, "Aziz");
        assert_eq!(payload.patient_last_name, "Karimov");
        assert_eq!(payload.appointment_date, "2024-05-01");
        assert_eq!(payload.appointment_time, "09:05");
    }

    #[tokio::test]
    async fn test_webhook_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(json!({
                "doctor_name": "Dr. Aliyev",
                "patient_first_name": "Aziz",
                "patient_last_name": "Karimov",
                "appointment_date": "2024-05-01",
                "appointment_time": "09:05"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = notifier_for(&format!("{}/hook", server.uri()));
        assert!(notifier.request_reschedule(&details()).await.is_ok());
    }

    #[tokio::test]
    async fn test_webhook_error_status_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = notifier_for(&format!("{}/hook", server.uri()));
        let result = notifier.request_reschedule(&details()).await;
        assert_matches!(result, Err(AppointmentError::NotificationFailed(_)));
    }

    #[tokio::test]
    async fn test_unconfigured_webhook_sends_nothing() {
        let notifier = notifier_for("");
        let result = notifier.request_reschedule(&details()).await;
        assert_matches!(result, Err(AppointmentError::NotConfigured(_)));
    }
}
