// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use doctor_cell::models::DoctorError;
use doctor_cell::DoctorService;
use patient_cell::models::PatientError;
use patient_cell::PatientService;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::staff::UserProfile;

use crate::models::{
    clock_time, Appointment, AppointmentDetails, AppointmentError, AppointmentQuery,
    AppointmentStatus, ConflictCheckResponse, CreateAppointmentRequest, UpdateAppointmentRequest,
};
use crate::services::conflict::ConflictDetectionService;
use crate::services::lifecycle::{QueueSnapshot, StatusPolicy};
use crate::services::realtime::{AppointmentChange, ChangeFeed};

/// PostgREST select that embeds the patient and doctor rows.
pub const DETAILS_SELECT: &str = "*,patient:patients(*),doctor:doctors(*)";

pub struct AppointmentBookingService {
    supabase: Arc<SupabaseClient>,
    conflict_service: ConflictDetectionService,
    patient_service: PatientService,
    doctor_service: DoctorService,
    changes: ChangeFeed,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig, changes: ChangeFeed) -> Self {
        let supabase = Arc::new(SupabaseClient::new(config));

        Self {
            conflict_service: ConflictDetectionService::new(Arc::clone(&supabase)),
            patient_service: PatientService::new(config),
            doctor_service: DoctorService::new(config),
            supabase,
            changes,
        }
    }

    pub async fn create_appointment(
        &self,
        profile: &UserProfile,
        request: CreateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        Self::require_nurse(profile, "book appointments")?;
        let complaint = validate_complaint(&request.complaint)?;

        info!("Booking appointment for patient {} with doctor {} on {} at {}",
              request.patient_id, request.doctor_id, request.appointment_date,
              clock_time::format(&request.appointment_time));

        self.verify_patient_exists(request.patient_id, auth_token).await?;
        self.verify_doctor_exists(request.doctor_id, auth_token).await?;

        self.conflict_service.ensure_slot_free(
            request.doctor_id,
            request.appointment_date,
            request.appointment_time,
            None,
            auth_token,
        ).await?;

        let now = Utc::now().to_rfc3339();
        let appointment_data = json!({
            "patient_id": request.patient_id,
            "doctor_id": request.doctor_id,
            "appointment_date": request.appointment_date.format("%Y-%m-%d").to_string(),
            "appointment_time": clock_time::format(&request.appointment_time),
            "complaint": complaint,
            "status": AppointmentStatus::Scheduled,
            "created_at": now,
            "updated_at": now,
        });

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/appointments",
            Some(auth_token),
            Some(appointment_data),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| {
            error!("Failed to insert appointment: {}", e);
            AppointmentError::DatabaseError(e.to_string())
        })?;

        let row = result.into_iter().next()
            .ok_or_else(|| AppointmentError::DatabaseError("Failed to create appointment".to_string()))?;
        let appointment = parse_appointment(row)?;

        info!("Appointment {} booked", appointment.id);
        self.changes.publish(AppointmentChange::inserted(&appointment));

        Ok(appointment)
    }

    pub async fn update_appointment(
        &self,
        profile: &UserProfile,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        Self::require_nurse(profile, "edit appointments")?;

        let current = self.get_appointment_row(appointment_id, auth_token).await?;
        if current.status.is_terminal() {
            warn!("Rejected edit of {} appointment {}", current.status, appointment_id);
            return Err(AppointmentError::Closed(current.status));
        }

        let mut update_data = Map::new();

        if let Some(complaint) = request.complaint.as_deref() {
            update_data.insert("complaint".to_string(), json!(validate_complaint(complaint)?));
        }

        if request.touches_schedule() {
            let doctor_id = request.doctor_id.unwrap_or(current.doctor_id);
            let date = request.appointment_date.unwrap_or(current.appointment_date);
            let time = request.appointment_time.unwrap_or(current.appointment_time);

            if doctor_id != current.doctor_id {
                self.verify_doctor_exists(doctor_id, auth_token).await?;
            }

            self.conflict_service.ensure_slot_free(
                doctor_id,
                date,
                time,
                Some(appointment_id),
                auth_token,
            ).await?;

            update_data.insert("doctor_id".to_string(), json!(doctor_id));
            update_data.insert("appointment_date".to_string(), json!(date.format("%Y-%m-%d").to_string()));
            update_data.insert("appointment_time".to_string(), json!(clock_time::format(&time)));
        }

        if update_data.is_empty() {
            return Err(AppointmentError::ValidationError("No fields to update".to_string()));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let updated = self.patch_appointment(appointment_id, Value::Object(update_data), auth_token).await?;

        info!("Appointment {} updated", appointment_id);
        self.changes.publish(AppointmentChange::updated(&current, &updated));

        Ok(updated)
    }

    pub async fn transition_status(
        &self,
        profile: &UserProfile,
        appointment_id: Uuid,
        target: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.get_appointment_row(appointment_id, auth_token).await?;

        let queue = if profile.is_doctor() && target == AppointmentStatus::InConsultation {
            Some(self.get_queue_snapshot(current.doctor_id, current.appointment_date, auth_token).await?)
        } else {
            None
        };

        StatusPolicy::check(profile, &current, target, queue.as_ref())?;

        let updated = self.patch_appointment(
            appointment_id,
            json!({
                "status": target,
                "updated_at": Utc::now().to_rfc3339(),
            }),
            auth_token,
        ).await?;

        info!("Appointment {} moved from {} to {}", appointment_id, current.status, updated.status);
        self.changes.publish(AppointmentChange::updated(&current, &updated));

        Ok(updated)
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<AppointmentDetails, AppointmentError> {
        debug!("Fetching appointment details: {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}&select={}", appointment_id, DETAILS_SELECT);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(AppointmentError::NotFound)?;
        serde_json::from_value(row)
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e)))
    }

    /// Lists appointments with embedded patient and doctor, ordered by date then time.
    pub async fn list_appointments(
        &self,
        query: &AppointmentQuery,
        auth_token: &str,
    ) -> Result<Vec<AppointmentDetails>, AppointmentError> {
        debug!("Listing appointments with filters: {:?}", query);

        let mut query_parts = vec![format!("select={}", DETAILS_SELECT)];

        if let Some(doctor_id) = query.doctor_id {
            query_parts.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(patient_id) = query.patient_id {
            query_parts.push(format!("patient_id=eq.{}", patient_id));
        }
        if let Some(date) = query.date {
            query_parts.push(format!("appointment_date=eq.{}", date.format("%Y-%m-%d")));
        }
        if let Some(from_date) = query.from_date {
            query_parts.push(format!("appointment_date=gte.{}", from_date.format("%Y-%m-%d")));
        }
        if let Some(to_date) = query.to_date {
            query_parts.push(format!("appointment_date=lte.{}", to_date.format("%Y-%m-%d")));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }

        let path = format!("/rest/v1/appointments?{}&order=appointment_date.asc,appointment_time.asc",
                           query_parts.join("&"));

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<AppointmentDetails>, _>>()
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointments: {}", e)))
    }

    pub async fn check_conflicts(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        self.conflict_service.check_conflict(doctor_id, date, time, exclude_appointment_id, auth_token).await
    }

    /// Current consultation and next patient for one doctor's day.
    pub async fn get_queue_snapshot(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<QueueSnapshot, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&appointment_date=eq.{}&status=in.(scheduled,in_consultation)&order=appointment_time.asc",
            doctor_id,
            date.format("%Y-%m-%d"),
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let day: Vec<Appointment> = result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointments: {}", e)))?;

        Ok(QueueSnapshot::from_day(&day))
    }

    // ==============================================================================
    // PRIVATE HELPERS
    // ==============================================================================

    fn require_nurse(profile: &UserProfile, action: &str) -> Result<(), AppointmentError> {
        if profile.is_nurse() {
            return Ok(());
        }
        warn!("User {} ({}) attempted to {}", profile.id, profile.position, action);
        Err(AppointmentError::NotPermitted(format!("Only nurses can {}", action)))
    }

    async fn get_appointment_row(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let row = result.into_iter().next().ok_or(AppointmentError::NotFound)?;
        parse_appointment(row)
    }

    async fn patch_appointment(
        &self,
        appointment_id: Uuid,
        update_data: Value,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(update_data),
            Some(SupabaseClient::return_representation()),
        ).await.map_err(|e| {
            error!("Failed to update appointment {}: {}", appointment_id, e);
            AppointmentError::DatabaseError(e.to_string())
        })?;

        // No row back means the store's policies hid it from this caller.
        let row = result.into_iter().next().ok_or(AppointmentError::NotFound)?;
        parse_appointment(row)
    }

    async fn verify_patient_exists(&self, patient_id: Uuid, auth_token: &str) -> Result<(), AppointmentError> {
        match self.patient_service.get_patient(patient_id, auth_token).await {
            Ok(_) => Ok(()),
            Err(PatientError::NotFound) => Err(AppointmentError::PatientNotFound),
            Err(e) => Err(AppointmentError::DatabaseError(e.to_string())),
        }
    }

    async fn verify_doctor_exists(&self, doctor_id: Uuid, auth_token: &str) -> Result<(), AppointmentError> {
        match self.doctor_service.get_doctor(doctor_id, auth_token).await {
            Ok(_) => Ok(()),
            Err(DoctorError::NotFound) => Err(AppointmentError::DoctorNotFound),
            Err(e) => Err(AppointmentError::DatabaseError(e.to_string())),
        }
    }
}

fn validate_complaint(complaint: &str) -> Result<String, AppointmentError> {
    let trimmed = complaint.trim();
    if trimmed.is_empty() {
        return Err(AppointmentError::ValidationError("complaint is required".to_string()));
    }
    Ok(trimmed.to_string())
}

fn parse_appointment(row: Value) -> Result<Appointment, AppointmentError> {
    serde_json::from_value(row)
        .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e)))
}
