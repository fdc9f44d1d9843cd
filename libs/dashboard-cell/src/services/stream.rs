use std::time::Duration;

use chrono::NaiveDate;
use futures::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use appointment_cell::AppointmentChange;

/// Pushed to a live dashboard. Clients re-fetch their view on every event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DashboardEvent {
    /// `change` is absent for poll ticks.
    Refresh { change: Option<AppointmentChange> },
    /// The subscriber fell behind and dropped `missed` changes.
    Resync { missed: u64 },
}

impl DashboardEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DashboardEvent::Refresh { .. } => "refresh",
            DashboardEvent::Resync { .. } => "resync",
        }
    }
}

/// Which changes a subscriber cares about. `None` matches everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamScope {
    pub doctor_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
}

impl StreamScope {
    pub fn includes(&self, change: &AppointmentChange) -> bool {
        change.affects(self.doctor_id, self.date)
    }
}

struct StreamState {
    receiver: Receiver<AppointmentChange>,
    scope: StreamScope,
    ticker: Option<Interval>,
}

enum Incoming {
    Change(Result<AppointmentChange, RecvError>),
    Tick,
}

/// Turns a feed subscription into dashboard events. With `poll_every` set a
/// bare refresh is also emitted on that period. The stream ends when the
/// feed closes; dropping it drops the subscription.
pub fn dashboard_events(
    receiver: Receiver<AppointmentChange>,
    scope: StreamScope,
    poll_every: Option<Duration>,
) -> impl Stream<Item = DashboardEvent> {
    let ticker = poll_every.map(|period| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    let state = StreamState { receiver, scope, ticker };

    stream::unfold(state, |mut state| async move {
        loop {
            let incoming = tokio::select! {
                received = state.receiver.recv() => Incoming::Change(received),
                _ = next_tick(&mut state.ticker) => Incoming::Tick,
            };

            let event = match incoming {
                Incoming::Change(Ok(change)) if state.scope.includes(&change) => {
                    DashboardEvent::Refresh { change: Some(change) }
                }
                Incoming::Change(Ok(_)) => continue,
                Incoming::Change(Err(RecvError::Lagged(missed))) => {
                    warn!("Dashboard subscriber lagged, {} changes dropped", missed);
                    DashboardEvent::Resync { missed }
                }
                Incoming::Change(Err(RecvError::Closed)) => {
                    debug!("Change feed closed, ending dashboard stream");
                    return None;
                }
                Incoming::Tick => DashboardEvent::Refresh { change: None },
            };

            return Some((event, state));
        }
    })
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
