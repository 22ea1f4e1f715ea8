//! Periodic eviction of sessions that never finished.
//!
//! Every `interval` the sweeper takes each non-exported session older than
//! `max_age` out of the registry, aborts its driver and releases it.
//! Exported sessions are left to their driver, which is already cleaning up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::PairingConfig;
use crate::event_bus::EventBus;
use crate::session::{SessionRegistry, SessionStatus};

#[derive(Debug, Clone)]
pub struct SweepReport {
    /// Sessions present when the pass started.
    pub checked: usize,
    pub evicted: usize,
    pub timestamp: DateTime<Utc>,
}

pub struct Sweeper {
    registry: Arc<SessionRegistry>,
    events: Arc<EventBus>,
    max_age: Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(
        registry: Arc<SessionRegistry>,
        events: Arc<EventBus>,
        max_age: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            events,
            max_age,
            interval,
        }
    }

    pub fn from_config(
        registry: Arc<SessionRegistry>,
        events: Arc<EventBus>,
        config: &PairingConfig,
    ) -> Self {
        Self::new(registry, events, config.max_session_age, config.sweep_interval)
    }

    /// Run one pass against the current time.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now()).await
    }

    /// Run one pass as if the clock read `now`.
    pub async fn sweep_at(&self, now: Instant) -> SweepReport {
        let checked = self.registry.len();
        let expired = self.registry.take_expired(self.max_age, now);
        let evicted = expired.len();

        for session in expired {
            let id = session.id.clone();
            log::info!(
                "Evicting session {} ({}), older than {:?}",
                id,
                session.status,
                self.max_age
            );
            session.release().await;
            self.events.status(&id, SessionStatus::Closed);
        }

        SweepReport {
            checked,
            evicted,
            timestamp: Utc::now(),
        }
    }

    /// Start the background task. The first pass runs one interval after start.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            log::info!(
                "Session sweeper started (every {:?}, max age {:?})",
                self.interval,
                self.max_age
            );

            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            timer.tick().await;

            loop {
                timer.tick().await;
                let report = self.sweep().await;
                if report.evicted > 0 {
                    log::info!(
                        "Swept {} of {} session(s)",
                        report.evicted,
                        report.checked
                    );
                }
            }
        })
    }
}
