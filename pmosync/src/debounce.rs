//! Timing helpers of the engine.
//!
//! - [`BroadcastDebounce`] bounds the rate of full snapshots without a fixed
//!   timer: it only remembers when the last snapshot actually left.
//! - [`DelayedTrigger`] collapses a burst of changes into one action fired a
//!   fixed delay after the last change (cancel-and-restart).
//!
//! Both take the current instant as a parameter so the decision logic stays
//! independent from the runtime clock.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct BroadcastDebounce {
    min_interval: Duration,
    last_sent_at: Option<Instant>,
}

impl BroadcastDebounce {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent_at: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_sent_at(&self) -> Option<Instant> {
        self.last_sent_at
    }

    /// Claims the right to send now.
    ///
    /// On success the debounce clock moves to `now`. When suppressed, the
    /// clock is left untouched and the earliest instant a send would be
    /// accepted is returned.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Instant> {
        match self.last_sent_at {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => {
                Err(last + self.min_interval)
            }
            _ => {
                self.last_sent_at = Some(now);
                Ok(())
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_sent_at = None;
    }
}

/// A single pending action with a deadline, restarted by every new arm.
#[derive(Debug, Clone)]
pub struct DelayedTrigger<T> {
    delay: Duration,
    pending: Option<(Instant, T)>,
}

impl<T> DelayedTrigger<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Schedules `value` for `now + delay`, superseding any pending value.
    /// Returns true when a pending value was replaced.
    pub fn arm(&mut self, value: T, now: Instant) -> bool {
        self.pending.replace((now + self.delay, value)).is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(deadline, _)| *deadline)
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Takes the pending value if its deadline has passed.
    pub fn fire(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((deadline, _)) if *deadline <= now => self.pending.take().map(|(_, value)| value),
            _ => None,
        }
    }

    pub fn cancel(&mut self) -> Option<T> {
        self.pending.take().map(|(_, value)| value)
    }
}
