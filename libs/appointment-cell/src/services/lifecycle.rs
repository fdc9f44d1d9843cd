// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::staff::{Position, UserProfile};

use crate::models::{Appointment, AppointmentError, AppointmentStatus};

impl AppointmentStatus {
    /// Statuses that still occupy a slot in the doctor's day.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::InConsultation)
    }

    /// No further transition is offered out of these.
    pub fn is_terminal(&self) -> bool {
        matches!(self,
            AppointmentStatus::Completed |
            AppointmentStatus::Cancelled |
            AppointmentStatus::NoShow
        )
    }

    /// The clinic's workflow graph.
    pub fn next_statuses(&self) -> &'static [AppointmentStatus] {
        match self {
            AppointmentStatus::Scheduled => &[
                AppointmentStatus::InConsultation,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::InConsultation => &[AppointmentStatus::Completed],
            AppointmentStatus::Completed
            | AppointmentStatus::Cancelled
            | AppointmentStatus::NoShow => &[],
        }
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        self.next_statuses().contains(&next)
    }
}

/// The state of one doctor's day that decides whether "start" is allowed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueSnapshot {
    /// Appointment currently `in_consultation`, if any.
    pub current: Option<Uuid>,
    /// Earliest `scheduled` appointment of the day.
    pub next_up: Option<Uuid>,
}

impl QueueSnapshot {
    /// Builds the snapshot from all of one doctor's appointments on one date.
    /// Ties on time go to whichever was booked first.
    pub fn from_day(appointments: &[Appointment]) -> Self {
        let current = appointments
            .iter()
            .filter(|a| a.status == AppointmentStatus::InConsultation)
            .min_by_key(|a| (a.appointment_time, a.created_at))
            .map(|a| a.id);

        let next_up = appointments
            .iter()
            .filter(|a| a.status == AppointmentStatus::Scheduled)
            .min_by_key(|a| (a.appointment_time, a.created_at))
            .map(|a| a.id);

        Self { current, next_up }
    }

    pub fn can_start(&self, appointment_id: Uuid) -> bool {
        self.current.is_none() && self.next_up == Some(appointment_id)
    }
}

/// Decides which status changes each position may make.
pub struct StatusPolicy;

impl StatusPolicy {
    /// Validates `profile` moving `appointment` to `target`. `queue` is the
    /// snapshot of the appointment's doctor and date; it is only consulted
    /// when a doctor starts a consultation.
    pub fn check(
        profile: &UserProfile,
        appointment: &Appointment,
        target: AppointmentStatus,
        queue: Option<&QueueSnapshot>,
    ) -> Result<(), AppointmentError> {
        debug!("Validating {} transition {} -> {} for appointment {}",
               profile.position, appointment.status, target, appointment.id);

        Self::evaluate(profile, appointment, target, queue).inspect_err(|e| {
            warn!("Rejected transition {} -> {} on appointment {}: {}",
                  appointment.status, target, appointment.id, e);
        })
    }

    /// Statuses `profile` may move `appointment` to right now.
    pub fn available_actions(
        profile: &UserProfile,
        appointment: &Appointment,
        queue: Option<&QueueSnapshot>,
    ) -> Vec<AppointmentStatus> {
        AppointmentStatus::ALL
            .into_iter()
            .filter(|target| Self::evaluate(profile, appointment, *target, queue).is_ok())
            .collect()
    }

    fn evaluate(
        profile: &UserProfile,
        appointment: &Appointment,
        target: AppointmentStatus,
        queue: Option<&QueueSnapshot>,
    ) -> Result<(), AppointmentError> {
        let current = appointment.status;
        if current.is_terminal() || current == target {
            return Err(AppointmentError::InvalidStatusTransition { from: current, to: target });
        }

        match profile.position {
            // Nurses may set any status while the appointment is still open.
            Position::Nurse => Ok(()),
            Position::Doctor => {
                if !profile.acts_as_doctor(appointment.doctor_id) {
                    return Err(AppointmentError::NotPermitted(
                        "Doctors can only update their own appointments".to_string(),
                    ));
                }

                if !current.can_transition_to(target) {
                    return Err(AppointmentError::InvalidStatusTransition { from: current, to: target });
                }

                if target == AppointmentStatus::Cancelled {
                    return Err(AppointmentError::NotPermitted(
                        "Only nurses can cancel appointments".to_string(),
                    ));
                }

                if target == AppointmentStatus::InConsultation {
                    let queue = queue.ok_or_else(|| {
                        AppointmentError::QueueOrder("Queue state unavailable".to_string())
                    })?;
                    if queue.current.is_some() {
                        return Err(AppointmentError::QueueOrder(
                            "Another consultation is already in progress".to_string(),
                        ));
                    }
                    if queue.next_up != Some(appointment.id) {
                        return Err(AppointmentError::QueueOrder(
                            "Only the earliest scheduled patient can be started".to_string(),
                        ));
                    }
                }

                Ok(())
            }
        }
    }
}
