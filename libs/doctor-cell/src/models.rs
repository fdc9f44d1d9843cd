use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::error::AppError;

/// Doctors are seeded outside the application and only ever read here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Doctor {
    pub id: Uuid,
    pub name: String,
    pub specialty: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoctorSearchQuery {
    pub specialty: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DoctorError {
    #[error("Doctor not found")]
    NotFound,

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<DoctorError> for AppError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::NotFound => AppError::NotFound(err.to_string()),
            DoctorError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}
