use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::Appointment;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level change to the appointments table. Subscribers re-fetch
/// their own view rather than applying the change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentChange {
    pub kind: ChangeKind,
    pub appointment_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub appointment_date: Option<NaiveDate>,
    /// Where the row was before an update moved it.
    pub previous_doctor_id: Option<Uuid>,
    pub previous_date: Option<NaiveDate>,
    pub occurred_at: DateTime<Utc>,
}

impl AppointmentChange {
    pub fn inserted(appointment: &Appointment) -> Self {
        Self {
            kind: ChangeKind::Insert,
            appointment_id: appointment.id,
            doctor_id: Some(appointment.doctor_id),
            appointment_date: Some(appointment.appointment_date),
            previous_doctor_id: None,
            previous_date: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn updated(before: &Appointment, after: &Appointment) -> Self {
        Self {
            kind: ChangeKind::Update,
            appointment_id: after.id,
            doctor_id: Some(after.doctor_id),
            appointment_date: Some(after.appointment_date),
            previous_doctor_id: Some(before.doctor_id).filter(|id| *id != after.doctor_id),
            previous_date: Some(before.appointment_date).filter(|d| *d != after.appointment_date),
            occurred_at: Utc::now(),
        }
    }

    /// Whether a view scoped to `doctor_id`/`date` (None = any) should refresh.
    /// Changes that carry no location are relevant to everyone.
    pub fn affects(&self, doctor_id: Option<Uuid>, date: Option<NaiveDate>) -> bool {
        let matches_doctor = |candidate: Option<Uuid>| match (doctor_id, candidate) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        };
        let matches_date = |candidate: Option<NaiveDate>| match (date, candidate) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        };

        let now_in_view = matches_doctor(self.doctor_id) && matches_date(self.appointment_date);
        let was_in_view = (self.previous_doctor_id.is_some() || self.previous_date.is_some())
            && matches_doctor(self.previous_doctor_id.or(self.doctor_id))
            && matches_date(self.previous_date.or(self.appointment_date));

        now_in_view || was_in_view
    }
}

/// Payload of a database webhook fired by the data store on row changes.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseWebhookPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    pub table: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub old_record: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChangedRow {
    id: Uuid,
    doctor_id: Option<Uuid>,
    appointment_date: Option<NaiveDate>,
}

impl DatabaseWebhookPayload {
    /// Converts the payload into a change, or `None` for other tables and
    /// rows that cannot be identified.
    pub fn into_change(self) -> Option<AppointmentChange> {
        if self.table != "appointments" {
            debug!("Ignoring change on table {}", self.table);
            return None;
        }

        let kind = match self.event_type.to_ascii_uppercase().as_str() {
            "INSERT" => ChangeKind::Insert,
            "UPDATE" => ChangeKind::Update,
            "DELETE" => ChangeKind::Delete,
            other => {
                warn!("Unknown change type {}", other);
                return None;
            }
        };

        let parse = |row: Option<Value>| row.and_then(|r| serde_json::from_value::<ChangedRow>(r).ok());
        let current = parse(self.record);
        let old = parse(self.old_record);

        let (row, previous) = match kind {
            ChangeKind::Delete => (old?, None),
            _ => (current?, old),
        };

        let previous_doctor_id = previous
            .as_ref()
            .and_then(|p| p.doctor_id)
            .filter(|id| Some(*id) != row.doctor_id);
        let previous_date = previous
            .as_ref()
            .and_then(|p| p.appointment_date)
            .filter(|d| Some(*d) != row.appointment_date);

        Some(AppointmentChange {
            kind,
            appointment_id: row.id,
            doctor_id: row.doctor_id,
            appointment_date: row.appointment_date,
            previous_doctor_id,
            previous_date,
            occurred_at: Utc::now(),
        })
    }
}

/// In-process fan-out of appointment changes to live dashboards.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<AppointmentChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns how many subscribers received the change.
    pub fn publish(&self, change: AppointmentChange) -> usize {
        debug!("Publishing {:?} for appointment {}", change.kind, change.appointment_id);
        // No subscribers is not an error.
        self.sender.send(change).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppointmentChange> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
