use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Timelike};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::supabase::SupabaseClient;

use crate::models::{clock_time, Appointment, AppointmentError, ConflictCheckResponse};

/// Two active appointments of one doctor must start at least this far apart.
pub const MIN_GAP_MINUTES: u32 = 30;

const DAY_START: (u32, u32) = (8, 0);
const DAY_END: (u32, u32) = (20, 0);
const SUGGESTION_STEP_MINUTES: u32 = 30;
const MAX_SUGGESTIONS: usize = 3;

pub fn minutes_since_midnight(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

/// True when the two start times are strictly less than `MIN_GAP_MINUTES` apart.
pub fn conflicts_with(candidate: NaiveTime, existing: NaiveTime) -> bool {
    minutes_since_midnight(candidate).abs_diff(minutes_since_midnight(existing)) < MIN_GAP_MINUTES
}

/// Filters `existing` down to the appointments that collide with `candidate`.
/// Callers pass only active appointments of the same doctor and date.
pub fn find_conflicts(candidate: NaiveTime, existing: &[Appointment]) -> Vec<Appointment> {
    existing
        .iter()
        .filter(|appointment| conflicts_with(candidate, appointment.appointment_time))
        .cloned()
        .collect()
}

/// Free start times on the working day, nearest to `candidate` first.
pub fn suggest_free_times(candidate: NaiveTime, taken: &[NaiveTime], limit: usize) -> Vec<NaiveTime> {
    let start = DAY_START.0 * 60 + DAY_START.1;
    let end = DAY_END.0 * 60 + DAY_END.1;
    let wanted = minutes_since_midnight(candidate);

    let mut slots: Vec<NaiveTime> = (start..end)
        .step_by(SUGGESTION_STEP_MINUTES as usize)
        .filter_map(|minutes| NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0))
        .filter(|slot| minutes_since_midnight(*slot) != wanted)
        .filter(|slot| !taken.iter().any(|existing| conflicts_with(*slot, *existing)))
        .collect();

    slots.sort_by_key(|slot| (minutes_since_midnight(*slot).abs_diff(wanted), minutes_since_midnight(*slot)));
    slots.truncate(limit);
    slots
}

pub struct ConflictDetectionService {
    supabase: Arc<SupabaseClient>,
}

impl ConflictDetectionService {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Checks a prospective booking against the doctor's active appointments
    /// that day. Advisory: nothing holds the slot between this read and the
    /// caller's write.
    pub async fn check_conflict(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<ConflictCheckResponse, AppointmentError> {
        debug!("Checking conflicts for doctor {} on {} at {}",
               doctor_id, date, clock_time::format(&time));

        let existing = self.get_active_appointments(
            doctor_id,
            date,
            exclude_appointment_id,
            auth_token,
        ).await?;

        let conflicting_appointments = find_conflicts(time, &existing);
        let has_conflict = !conflicting_appointments.is_empty();

        let suggested_times = if has_conflict {
            warn!("Conflict detected for doctor {} on {} at {} - {} conflicting appointments",
                  doctor_id, date, clock_time::format(&time), conflicting_appointments.len());
            let taken: Vec<NaiveTime> = existing.iter().map(|a| a.appointment_time).collect();
            suggest_free_times(time, &taken, MAX_SUGGESTIONS)
        } else {
            vec![]
        };

        Ok(ConflictCheckResponse {
            has_conflict,
            conflicting_appointments,
            suggested_times,
        })
    }

    /// Fails with `ConflictDetected` when the slot is taken.
    pub async fn ensure_slot_free(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<(), AppointmentError> {
        let response = self.check_conflict(doctor_id, date, time, exclude_appointment_id, auth_token).await?;

        match response.conflicting_appointments.first() {
            Some(existing) => Err(AppointmentError::ConflictDetected {
                date,
                requested: clock_time::format(&time),
                existing: clock_time::format(&existing.appointment_time),
            }),
            None => Ok(()),
        }
    }

    async fn get_active_appointments(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        exclude_appointment_id: Option<Uuid>,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query_parts = vec![
            format!("doctor_id=eq.{}", doctor_id),
            format!("appointment_date=eq.{}", date.format("%Y-%m-%d")),
            "status=in.(scheduled,in_consultation)".to_string(),
        ];

        if let Some(exclude_id) = exclude_appointment_id {
            query_parts.push(format!("id=neq.{}", exclude_id));
        }

        let path = format!("/rest/v1/appointments?{}&order=appointment_time.asc",
                           query_parts.join("&"));

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let appointments: Vec<Appointment> = result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointments: {}", e)))?;

        // The store filter already does this; an edited row must never collide with itself.
        Ok(appointments
            .into_iter()
            .filter(|a| a.status.is_active() && Some(a.id) != exclude_appointment_id)
            .collect())
    }
}
