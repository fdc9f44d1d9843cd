// libs/dashboard-cell/src/models.rs
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use appointment_cell::models::{AppointmentDetails, AppointmentStatus};
use appointment_cell::services::lifecycle::QueueSnapshot;

/// Doctor view clients re-fetch at least this often even without changes.
pub const DOCTOR_POLL_INTERVAL_SECONDS: u64 = 30;

// ==============================================================================
// FILTERING
// ==============================================================================

/// What a dashboard is looking at. Doctor and date narrow the store query;
/// the whole filter is then applied to the fetched rows with `matches`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentFilter {
    pub doctor_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub status: Option<AppointmentStatus>,
    pub search: Option<String>,
    /// Show cancelled appointments when no status is selected.
    #[serde(default)]
    pub include_cancelled: bool,
}

impl AppointmentFilter {
    pub fn matches(&self, details: &AppointmentDetails) -> bool {
        let appointment = &details.appointment;

        if self.doctor_id.is_some_and(|id| id != appointment.doctor_id) {
            return false;
        }
        if self.date.is_some_and(|date| date != appointment.appointment_date) {
            return false;
        }

        match self.status {
            Some(status) if status != appointment.status => return false,
            None if !self.include_cancelled && appointment.status == AppointmentStatus::Cancelled => {
                return false
            }
            _ => {}
        }

        match self.search_term() {
            Some(term) => Self::search_fields(details).any(|field| field.to_lowercase().contains(&term)),
            None => true,
        }
    }

    fn search_term(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(str::to_lowercase)
    }

    fn search_fields(details: &AppointmentDetails) -> impl Iterator<Item = String> + '_ {
        let patient = details.patient.iter().flat_map(|p| {
            [p.first_name.clone(), p.last_name.clone(), p.full_name()]
        });
        let doctor = details.doctor.iter().map(|d| d.name.clone());
        patient.chain(doctor)
    }
}

// ==============================================================================
// VIEWS
// ==============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DashboardRow {
    #[serde(flatten)]
    pub details: AppointmentDetails,
    /// Statuses the caller may set on this appointment right now.
    pub available_actions: Vec<AppointmentStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NurseDashboard {
    pub appointments: Vec<DashboardRow>,
    pub total: usize,
    pub status_counts: BTreeMap<AppointmentStatus, usize>,
}

impl NurseDashboard {
    pub fn new(appointments: Vec<DashboardRow>) -> Self {
        let mut status_counts = BTreeMap::new();
        for row in &appointments {
            *status_counts.entry(row.details.appointment.status).or_insert(0) += 1;
        }

        Self {
            total: appointments.len(),
            appointments,
            status_counts,
        }
    }
}

/// One doctor's day, split the way the consultation room works through it.
#[derive(Debug, Clone, Serialize)]
pub struct DoctorQueue {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub current: Option<DashboardRow>,
    pub waiting: Vec<DashboardRow>,
    pub finished: Vec<DashboardRow>,
    pub next_up: Option<Uuid>,
    pub can_start: bool,
    pub poll_interval_seconds: u64,
}

impl DoctorQueue {
    /// `rows` are the doctor's appointments for `date`, already carrying
    /// their available actions. Cancelled appointments are left out.
    pub fn build(doctor_id: Uuid, date: NaiveDate, snapshot: &QueueSnapshot, rows: Vec<DashboardRow>) -> Self {
        let mut current = None;
        let mut waiting = Vec::new();
        let mut finished = Vec::new();

        for row in rows {
            match row.details.appointment.status {
                AppointmentStatus::InConsultation if snapshot.current == Some(row.details.appointment.id) => {
                    current = Some(row)
                }
                AppointmentStatus::InConsultation | AppointmentStatus::Scheduled => waiting.push(row),
                AppointmentStatus::Completed | AppointmentStatus::NoShow => finished.push(row),
                AppointmentStatus::Cancelled => {}
            }
        }

        waiting.sort_by_key(|row| (row.details.appointment.appointment_time, row.details.appointment.created_at));
        finished.sort_by_key(|row| row.details.appointment.appointment_time);

        Self {
            doctor_id,
            date,
            current,
            waiting,
            finished,
            next_up: snapshot.next_up,
            can_start: snapshot.next_up.is_some_and(|id| snapshot.can_start(id)),
            poll_interval_seconds: DOCTOR_POLL_INTERVAL_SECONDS,
        }
    }
}

// ==============================================================================
// QUERY PARAMETERS
// ==============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DoctorDashboardQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardView {
    #[default]
    Nurse,
    Doctor,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub view: DashboardView,
    pub doctor_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
}
