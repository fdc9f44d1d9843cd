use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A staff member's role in the clinic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Doctor,
    Nurse,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Doctor => write!(f, "doctor"),
            Position::Nurse => write!(f, "nurse"),
        }
    }
}

/// Row of `user_profiles`: links an auth identity to a position and, for
/// doctors, to the `doctors` row they act as.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: String,
    pub position: Position,
    pub doctor_id: Option<Uuid>,
    pub full_name: Option<String>,
}

impl UserProfile {
    pub fn is_nurse(&self) -> bool {
        self.position == Position::Nurse
    }

    pub fn is_doctor(&self) -> bool {
        self.position == Position::Doctor
    }

    /// True when this profile is the doctor the appointment is booked with.
    pub fn acts_as_doctor(&self, doctor_id: Uuid) -> bool {
        self.is_doctor() && self.doctor_id == Some(doctor_id)
    }
}
