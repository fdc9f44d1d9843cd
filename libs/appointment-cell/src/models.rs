// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate, NaiveTime};
use std::fmt;
use std::str::FromStr;

use doctor_cell::models::Doctor;
use patient_cell::models::Patient;
use shared_models::error::AppError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    #[serde(with = "clock_time")]
    pub appointment_time: NaiveTime,
    pub complaint: String,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Appointment row with its `patient` and `doctor` embedded by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentDetails {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub patient: Option<Patient>,
    pub doctor: Option<Doctor>,
}

impl AppointmentDetails {
    pub fn patient_name(&self) -> Option<String> {
        self.patient.as_ref().map(Patient::full_name)
    }

    pub fn doctor_name(&self) -> Option<&str> {
        self.doctor.as_ref().map(|d| d.name.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    InConsultation,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::InConsultation,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::InConsultation => "in_consultation",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = AppointmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppointmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AppointmentError::ValidationError(format!("Unknown status: {}", s)))
    }
}

/// Times of day travel as `HH:MM`; the store hands them back as `HH:MM:SS`.
pub mod clock_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const OUTPUT_FORMAT: &str = "%H:%M";

    pub fn parse(value: &str) -> Option<NaiveTime> {
        let value = value.trim();
        NaiveTime::parse_from_str(value, "%H:%M:%S%.f")
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
            .ok()
    }

    pub fn format(time: &NaiveTime) -> String {
        time.format(OUTPUT_FORMAT).to_string()
    }

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(time))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {}", raw)))
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match time {
                Some(time) => super::serialize(time, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid time of day: {}", raw))),
                None => Ok(None),
            }
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_date: NaiveDate,
    #[serde(with = "clock_time")]
    pub appointment_time: NaiveTime,
    pub complaint: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub doctor_id: Option<Uuid>,
    pub appointment_date: Option<NaiveDate>,
    #[serde(default, with = "clock_time::option")]
    pub appointment_time: Option<NaiveTime>,
    pub complaint: Option<String>,
}

impl UpdateAppointmentRequest {
    pub fn touches_schedule(&self) -> bool {
        self.doctor_id.is_some() || self.appointment_date.is_some() || self.appointment_time.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentQuery {
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckQuery {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "clock_time")]
    pub time: NaiveTime,
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub conflicting_appointments: Vec<Appointment>,
    #[serde(serialize_with = "serialize_times")]
    pub suggested_times: Vec<NaiveTime>,
}

fn serialize_times<S>(times: &[NaiveTime], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(times.iter().map(clock_time::format))
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Doctor already has an appointment at {existing} on {date}, less than 30 minutes from {requested}")]
    ConflictDetected {
        date: NaiveDate,
        requested: String,
        existing: String,
    },

    #[error("Cannot change status from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("{0}")]
    QueueOrder(String),

    #[error("Appointment is {0} and can no longer be edited")]
    Closed(AppointmentStatus),

    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("{0} is not configured")]
    NotConfigured(String),

    #[error("Notification failed: {0}")]
    NotificationFailed(String),
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        let message = err.to_string();
        match err {
            AppointmentError::NotFound
            | AppointmentError::PatientNotFound
            | AppointmentError::DoctorNotFound => AppError::NotFound(message),
            AppointmentError::ConflictDetected { .. }
            | AppointmentError::InvalidStatusTransition { .. }
            | AppointmentError::QueueOrder(_)
            | AppointmentError::Closed(_) => AppError::Conflict(message),
            AppointmentError::NotPermitted(_) => AppError::Forbidden(message),
            AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
            AppointmentError::DatabaseError(msg) => AppError::Database(msg),
            AppointmentError::NotConfigured(_)
            | AppointmentError::NotificationFailed(_) => AppError::ExternalService(message),
        }
    }
}
