//! Connection lifecycle: connect → active → grace period → gone.
//!
//! Each connection owns at most one timer task at a time. While ACTIVE it
//! is the liveness tick; after disconnect it is the grace-period expiry.
//! Leaving a state aborts the timer that state armed. A connection with no
//! entry in the timer map is GONE (or was never known).
//!
//! Reconnecting always yields a brand-new identity; a grace-period record
//! is never resumed.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::debug;

use crate::config::ServerConfig;
use crate::presence::ConnectionHandle;
use crate::relay::{Connection, Relay};

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Active,
    GracePeriod,
}

#[derive(Debug)]
enum Phase {
    /// Holds the liveness tick task.
    Active(JoinHandle<()>),
    /// Holds the expiry task.
    GracePeriod(JoinHandle<()>),
}

impl Phase {
    #[cfg(test)]
    fn state(&self) -> LifecycleState {
        match self {
            Phase::Active(_) => LifecycleState::Active,
            Phase::GracePeriod(_) => LifecycleState::GracePeriod,
        }
    }

    fn abort(&self) {
        match self {
            Phase::Active(task) | Phase::GracePeriod(task) => task.abort(),
        }
    }
}

type PhaseMap = Arc<Mutex<HashMap<ConnectionHandle, Phase>>>;

pub struct Lifecycle {
    relay: Arc<Relay>,
    liveness_interval: Duration,
    grace_period: Duration,
    phases: PhaseMap,
}

impl Lifecycle {
    pub fn new(relay: Arc<Relay>, config: &ServerConfig) -> Self {
        Self {
            relay,
            liveness_interval: config.liveness_interval,
            grace_period: config.grace_period,
            phases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new connection and arm its liveness tick.
    pub async fn connect(&self, address: IpAddr) -> Connection {
        let connection = self.relay.connect(address).await;
        let handle = connection.handle;

        let relay = self.relay.clone();
        let period = self.liveness_interval;
        let tick = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !relay.touch(handle).await {
                    break;
                }
            }
        });

        self.phases.lock().await.insert(handle, Phase::Active(tick));
        connection
    }

    /// Handle a transport-level disconnect: stop the tick, enter the grace
    /// period and arm the expiry timer. Repeated calls are no-ops.
    pub async fn disconnect(&self, handle: ConnectionHandle) {
        let previous = self.phases.lock().await.remove(&handle);
        match previous {
            Some(Phase::Active(tick)) => tick.abort(),
            Some(grace @ Phase::GracePeriod(_)) => {
                self.phases.lock().await.insert(handle, grace);
                return;
            }
            None => return,
        }

        self.relay.disconnect(handle).await;

        // Spawn while holding the map so the task's own cleanup cannot run
        // before its entry exists.
        let mut phases = self.phases.lock().await;
        let relay = self.relay.clone();
        let cleanup = self.phases.clone();
        let delay = self.grace_period;
        let expiry = tokio::spawn(async move {
            sleep(delay).await;
            relay.expire(handle).await;
            cleanup.lock().await.remove(&handle);
        });
        phases.insert(handle, Phase::GracePeriod(expiry));
        debug!(handle = %handle, grace_secs = delay.as_secs(), "Armed grace-period expiry");
    }

    #[cfg(test)]
    pub async fn state(&self, handle: ConnectionHandle) -> Option<LifecycleState> {
        self.phases.lock().await.get(&handle).map(Phase::state)
    }

    /// Abort every outstanding timer.
    pub async fn shutdown(&self) {
        let mut phases = self.phases.lock().await;
        for phase in phases.values() {
            phase.abort();
        }
        debug!(timers = phases.len(), "Cancelled lifecycle timers");
        phases.clear();
    }
}
