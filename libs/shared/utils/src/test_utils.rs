use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub webhook_secret: String,
    pub reschedule_webhook_url: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            webhook_secret: "test-webhook-secret".to_string(),
            reschedule_webhook_url: String::new(),
        }
    }
}

impl TestConfig {
    /// Points the data store at a mock server.
    pub fn with_supabase(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            supabase_webhook_secret: self.webhook_secret.clone(),
            reschedule_webhook_url: self.reschedule_webhook_url.clone(),
            port: 3000,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "staff@clinic.test".to_string(),
            role: "authenticated".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str) -> Self {
        Self {
            email: email.to_string(),
            ..Self::default()
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email)
    }

    pub fn nurse(email: &str) -> Self {
        Self::new(email)
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }
}

/// Rows shaped the way the data store returns them.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn nurse_profile(user_id: &str) -> serde_json::Value {
        json!({
            "id": user_id,
            "position": "nurse",
            "doctor_id": null,
            "full_name": "Dilnoza Rakhimova"
        })
    }

    pub fn doctor_profile(user_id: &str, doctor_id: &str) -> serde_json::Value {
        json!({
            "id": user_id,
            "position": "doctor",
            "doctor_id": doctor_id,
            "full_name": "Dr. Timur Aliyev"
        })
    }

    pub fn patient_response(patient_id: &str, first_name: &str, last_name: &str) -> serde_json::Value {
        json!({
            "id": patient_id,
            "first_name": first_name,
            "last_name": last_name,
            "phone": "+998 90 123 45 67",
            "telegram": "@patient_handle",
            "age": 42,
            "created_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn doctor_response(doctor_id: &str, name: &str, specialty: Option<&str>) -> serde_json::Value {
        json!({
            "id": doctor_id,
            "name": name,
            "specialty": specialty
        })
    }

    pub fn appointment_response(
        appointment_id: &str,
        patient_id: &str,
        doctor_id: &str,
        date: &str,
        time: &str,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": appointment_id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "appointment_date": date,
            "appointment_time": time,
            "complaint": "Persistent headache",
            "status": status,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    /// Appointment row with embedded `patient` and `doctor` resources.
    pub fn appointment_details_response(
        appointment_id: &str,
        patient: serde_json::Value,
        doctor: serde_json::Value,
        date: &str,
        time: &str,
        status: &str,
    ) -> serde_json::Value {
        let mut row = Self::appointment_response(
            appointment_id,
            patient["id"].as_str().unwrap_or_default(),
            doctor["id"].as_str().unwrap_or_default(),
            date,
            time,
            status,
        );
        row["patient"] = patient;
        row["doctor"] = doctor;
        row
    }
}
