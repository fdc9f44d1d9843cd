use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::error::AppError;

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9+\-() ]{7,20}$").expect("valid phone pattern"));
static TELEGRAM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@?[A-Za-z0-9_]{5,32}$").expect("valid telegram pattern"));

pub const MAX_AGE: i32 = 150;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub telegram: Option<String>,
    pub age: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePatientRequest {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub telegram: Option<String>,
    pub age: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePatientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub telegram: Option<String>,
    pub age: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientSearchQuery {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, thiserror::Error)]
pub enum PatientError {
    #[error("Patient not found")]
    NotFound,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<PatientError> for AppError {
    fn from(err: PatientError) -> Self {
        match err {
            PatientError::NotFound => AppError::NotFound(err.to_string()),
            PatientError::ValidationError(msg) => AppError::ValidationError(msg),
            PatientError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

pub fn validate_name(field: &str, value: &str) -> Result<String, PatientError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PatientError::ValidationError(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

pub fn validate_phone(value: &str) -> Result<String, PatientError> {
    let trimmed = value.trim();
    if !PHONE_RE.is_match(trimmed) {
        return Err(PatientError::ValidationError(format!("Invalid phone number: {}", value)));
    }
    Ok(trimmed.to_string())
}

/// Normalises a telegram handle to its `@name` form. Blank input clears it.
pub fn normalize_telegram(value: &str) -> Result<Option<String>, PatientError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if !TELEGRAM_RE.is_match(trimmed) {
        return Err(PatientError::ValidationError(format!("Invalid telegram handle: {}", value)));
    }
    Ok(Some(format!("@{}", trimmed.trim_start_matches('@'))))
}

pub fn validate_age(age: i32) -> Result<i32, PatientError> {
    if !(0..=MAX_AGE).contains(&age) {
        return Err(PatientError::ValidationError(format!("Age must be between 0 and {}", MAX_AGE)));
    }
    Ok(age)
}
