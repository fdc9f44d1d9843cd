use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{Doctor, DoctorError, DoctorSearchQuery};

pub struct DoctorService {
    supabase: SupabaseClient,
}

impl DoctorService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn get_doctor(&self, doctor_id: Uuid, auth_token: &str) -> Result<Doctor, DoctorError> {
        debug!("Fetching doctor {}", doctor_id);

        let path = format!("/rest/v1/doctors?id=eq.{}", doctor_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(DoctorError::NotFound)?;
        serde_json::from_value(row)
            .map_err(|e| DoctorError::DatabaseError(format!("Failed to parse doctor: {}", e)))
    }

    pub async fn list_doctors(
        &self,
        query: &DoctorSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Doctor>, DoctorError> {
        debug!("Listing doctors with query: {:?}", query);

        let mut path = "/rest/v1/doctors?order=name.asc".to_string();
        if let Some(specialty) = query.specialty.as_deref().filter(|s| !s.trim().is_empty()) {
            path.push_str(&format!("&specialty=ilike.*{}*", urlencoding::encode(specialty.trim())));
        }

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| DoctorError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Doctor>, _>>()
            .map_err(|e| DoctorError::DatabaseError(format!("Failed to parse doctors: {}", e)))
    }
}
