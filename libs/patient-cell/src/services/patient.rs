use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, error, info};
use uuid::Uuid;
use chrono::Utc;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{
    normalize_telegram, validate_age, validate_name, validate_phone, CreatePatientRequest,
    Patient, PatientError, PatientSearchQuery, UpdatePatientRequest,
};

const DEFAULT_SEARCH_LIMIT: i32 = 50;

pub struct PatientService {
    supabase: SupabaseClient,
}

impl PatientService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn create_patient(
        &self,
        request: CreatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        let first_name = validate_name("first_name", &request.first_name)?;
        let last_name = validate_name("last_name", &request.last_name)?;
        let phone = validate_phone(&request.phone)?;
        let telegram = match request.telegram.as_deref() {
            Some(handle) => normalize_telegram(handle)?,
            None => None,
        };
        let age = request.age.map(validate_age).transpose()?;

        debug!("Creating patient record for {} {}", first_name, last_name);

        let patient_data = json!({
            "first_name": first_name,
            "last_name": last_name,
            "phone": phone,
            "telegram": telegram,
            "age": age,
            "created_at": Utc::now().to_rfc3339()
        });

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/patients",
            Some(auth_token),
            Some(patient_data),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| {
            error!("Failed to insert patient: {}", e);
            PatientError::DatabaseError(e.to_string())
        })?;

        let patient = Self::first_patient(result)
            .ok_or_else(|| PatientError::DatabaseError("Failed to create patient".to_string()))??;

        info!("Patient {} created", patient.id);
        Ok(patient)
    }

    pub async fn get_patient(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        debug!("Fetching patient: {}", patient_id);

        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        Self::first_patient(result).ok_or(PatientError::NotFound)?
    }

    pub async fn update_patient(
        &self,
        patient_id: Uuid,
        request: UpdatePatientRequest,
        auth_token: &str,
    ) -> Result<Patient, PatientError> {
        debug!("Updating patient: {}", patient_id);

        let mut update_data = serde_json::Map::new();

        if let Some(first_name) = request.first_name {
            update_data.insert("first_name".to_string(), json!(validate_name("first_name", &first_name)?));
        }
        if let Some(last_name) = request.last_name {
            update_data.insert("last_name".to_string(), json!(validate_name("last_name", &last_name)?));
        }
        if let Some(phone) = request.phone {
            update_data.insert("phone".to_string(), json!(validate_phone(&phone)?));
        }
        if let Some(telegram) = request.telegram {
            update_data.insert("telegram".to_string(), json!(normalize_telegram(&telegram)?));
        }
        if let Some(age) = request.age {
            update_data.insert("age".to_string(), json!(validate_age(age)?));
        }

        if update_data.is_empty() {
            return Err(PatientError::ValidationError("Nothing to update".to_string()));
        }

        let path = format!("/rest/v1/patients?id=eq.{}", patient_id);
        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(Value::Object(update_data)),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| {
            error!("Failed to update patient {}: {}", patient_id, e);
            PatientError::DatabaseError(e.to_string())
        })?;

        Self::first_patient(result).ok_or(PatientError::NotFound)?
    }

    pub async fn search_patients(
        &self,
        query: PatientSearchQuery,
        auth_token: &str,
    ) -> Result<Vec<Patient>, PatientError> {
        debug!("Searching patients with query: {:?}", query);

        let mut query_parts = vec!["order=last_name.asc,first_name.asc".to_string()];

        if let Some(name) = query.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            let name = urlencoding::encode(name);
            query_parts.push(format!("or=(first_name.ilike.*{}*,last_name.ilike.*{}*)", name, name));
        }
        if let Some(phone) = query.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            query_parts.push(format!("phone=ilike.*{}*", urlencoding::encode(phone)));
        }

        let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, 200);
        let offset = query.offset.unwrap_or(0).max(0);
        query_parts.push(format!("limit={}", limit));
        query_parts.push(format!("offset={}", offset));

        let path = format!("/rest/v1/patients?{}", query_parts.join("&"));

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| PatientError::DatabaseError(e.to_string()))?;

        result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Patient>, _>>()
            .map_err(|e| PatientError::DatabaseError(format!("Failed to parse patients: {}", e)))
    }

    fn first_patient(rows: Vec<Value>) -> Option<Result<Patient, PatientError>> {
        rows.into_iter().next().map(|row| {
            serde_json::from_value(row)
                .map_err(|e| PatientError::DatabaseError(format!("Failed to parse patient: {}", e)))
        })
    }
}
