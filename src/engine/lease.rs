//! Step lease.
//!
//! A step owns the state-record lease from claim to commit. While it runs, a
//! heartbeat task pushes the expiry forward every third of the TTL, so a
//! slow step is never mistaken for a crashed one. Before anything
//! irreversible is submitted the owner renews synchronously and backs off
//! if the lease has changed hands.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::storage::CycleStore;
use crate::types::RotorError;

/// Checked immediately before a transaction is submitted.
#[async_trait]
pub trait SubmitGuard: Send + Sync {
    async fn ensure_held(&self) -> Result<(), RotorError>;
}

pub struct StepLease {
    store: Arc<dyn CycleStore>,
    owner: String,
    ttl: chrono::Duration,
    claimed_at: DateTime<Utc>,
    started: Instant,
    heartbeat: Option<JoinHandle<()>>,
}

impl StepLease {
    /// Wrap a lease claimed at `claimed_at` and start its heartbeat.
    pub fn start(
        store: Arc<dyn CycleStore>,
        owner: String,
        claimed_at: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        let mut lease = Self { store, owner, ttl, claimed_at, started: Instant::now(), heartbeat: None };
        lease.heartbeat = Some(lease.spawn_heartbeat());
        lease
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The claim time plus however long the step has been running.
    pub fn now(&self) -> DateTime<Utc> {
        step_clock(self.claimed_at, self.started)
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let owner = self.owner.clone();
        let ttl = self.ttl;
        let claimed_at = self.claimed_at;
        let started = self.started;
        let period = (ttl / 3)
            .to_std()
            .unwrap_or(Duration::from_secs(1))
            .max(Duration::from_millis(100));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match store.renew_lease(&owner, step_clock(claimed_at, started), ttl).await {
                    Ok(true) => debug!(owner = %owner, "Lease renewed"),
                    Ok(false) => {
                        warn!(owner = %owner, "Lease no longer held; heartbeat stopped");
                        break;
                    }
                    Err(e) => warn!(owner = %owner, error = %e, "Lease renewal failed"),
                }
            }
        })
    }
}

#[async_trait]
impl SubmitGuard for StepLease {
    async fn ensure_held(&self) -> Result<(), RotorError> {
        match self.store.renew_lease(&self.owner, self.now(), self.ttl).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(RotorError::LeaseLost(self.owner.clone())),
            Err(e) => Err(RotorError::Storage(format!("renew lease: {e:#}"))),
        }
    }
}

impl Drop for StepLease {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }
}

fn step_clock(claimed_at: DateTime<Utc>, started: Instant) -> DateTime<Utc> {
    claimed_at + chrono::Duration::from_std(started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero())
}
