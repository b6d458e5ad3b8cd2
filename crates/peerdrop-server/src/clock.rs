use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Wall-clock timestamps that advance with tokio's clock.
///
/// Anchored once at startup; every later reading is the anchor plus the
/// monotonic time elapsed since, so `last_seen_at` never runs backwards
/// and timers and timestamps agree even when the runtime clock is paused.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin_wall: DateTime<Utc>,
    origin: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin_wall: Utc::now(),
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().duration_since(self.origin);
        // Durations beyond chrono's range are unreachable for a running process.
        self.origin_wall + chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero())
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
