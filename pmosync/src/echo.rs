//! Feedback-loop suppression.
//!
//! When the engine applies a remote command to the local player, the player
//! fires the matching lifecycle event (`play`, `pause`, `seeked`) as a side
//! effect. Those events must not be broadcast back to the room. Each applied
//! command registers one expected echo, valid for a short window; the first
//! matching local event inside the window consumes it.
//!
//! A `seeked` echo must also land where the engine sent the player. A player
//! that skips the event (seek to the current position) would otherwise leave
//! an expectation behind that swallows a genuine user seek.

use std::time::Duration;

use tokio::time::Instant;

use crate::model::PlayerEventKind;

/// Distance, in seconds, under which a `seeked` position matches the target.
const SEEK_MATCH_SECS: f64 = 0.25;

#[derive(Debug, Clone)]
struct Expected {
    kind: PlayerEventKind,
    target: Option<f64>,
    deadline: Instant,
}

impl Expected {
    fn matches(&self, kind: PlayerEventKind, position: Option<f64>) -> bool {
        if self.kind != kind {
            return false;
        }
        match (self.target, position) {
            (Some(target), Some(position)) => (target - position).abs() <= SEEK_MATCH_SECS,
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EchoGuard {
    window: Duration,
    expected: Vec<Expected>,
}

impl EchoGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            expected: Vec::new(),
        }
    }

    pub fn expect(&mut self, kind: PlayerEventKind, now: Instant) {
        self.push(kind, None, now);
    }

    /// Expects the `seeked` event of a seek to `target`.
    pub fn expect_seek(&mut self, target: f64, now: Instant) {
        self.push(PlayerEventKind::Seeked, Some(target), now);
    }

    /// Forgets one expectation of `kind` (the command did not go through).
    pub fn forget(&mut self, kind: PlayerEventKind) {
        if let Some(index) = self.expected.iter().position(|e| e.kind == kind) {
            self.expected.remove(index);
        }
    }

    /// True when `kind` is the echo of a command we applied ourselves.
    /// `position` is the player position when the event is handled; a
    /// `seeked` away from every expected target is genuine.
    pub fn consume(&mut self, kind: PlayerEventKind, position: Option<f64>, now: Instant) -> bool {
        self.purge(now);
        match self.expected.iter().position(|e| e.matches(kind, position)) {
            Some(index) => {
                self.expected.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.expected.len()
    }

    pub fn clear(&mut self) {
        self.expected.clear();
    }

    fn push(&mut self, kind: PlayerEventKind, target: Option<f64>, now: Instant) {
        self.purge(now);
        self.expected.push(Expected {
            kind,
            target,
            deadline: now + self.window,
        });
    }

    fn purge(&mut self, now: Instant) {
        self.expected.retain(|e| e.deadline >= now);
    }
}
