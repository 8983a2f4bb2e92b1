//! Notification throttling.
//!
//! State changes arrive far more often than anyone needs to hear about them.
//! A [`Throttle`] coalesces change notifications so a snapshot is published at
//! most once per interval. The first change after a quiet period publishes
//! immediately.

use std::time::Duration;

use tokio::time::Instant;

/// Leading-edge throttle.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_fired: Option<Instant>,
    deadline: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record a change at `now`. Returns when the notification is due.
    pub fn notify(&mut self, now: Instant) -> Instant {
        *self.deadline.get_or_insert_with(|| match self.last_fired {
            Some(last) => (last + self.interval).max(now),
            None => now,
        })
    }

    /// When the pending notification is due, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consume the pending notification if it is due at `now`.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.last_fired = Some(now);
                true
            }
            _ => false,
        }
    }
}
