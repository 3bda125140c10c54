//! Cross-member ordering of protocol frames.
//!
//! The room transport only guarantees ordering per sender. Each engine keeps
//! a Lamport clock: it ticks on every send and observes every received stamp,
//! so a frame sent after seeing another one always carries a larger stamp.
//! Concurrent frames are tie-broken by sender id.

use std::collections::BTreeMap;

use crate::model::MemberId;

#[derive(Debug, Default, Clone)]
pub struct LamportClock {
    time: u64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.time
    }

    /// Stamp for an outgoing frame.
    pub fn tick(&mut self) -> u64 {
        self.time = self.time.saturating_add(1);
        self.time
    }

    pub fn observe(&mut self, stamp: u64) {
        self.time = self.time.max(stamp);
    }
}

/// Total order over stamped frames.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameOrder {
    pub stamp: u64,
    pub from: MemberId,
}

impl FrameOrder {
    pub fn new(stamp: u64, from: MemberId) -> Self {
        Self { stamp, from }
    }
}

/// Decides whether a snapshot may still be applied.
///
/// A snapshot is stale when a newer discrete command (play, pause, seek)
/// was applied after the last frame heard from the snapshot's sender: the
/// sender cannot have known about that command. A member heard from for the
/// first time is never stale, whatever its stamp, since its clock may start
/// behind the room's past traffic.
#[derive(Debug, Default, Clone)]
pub struct StaleFilter {
    received: u64,
    last_heard: BTreeMap<MemberId, u64>,
    last_command: Option<(FrameOrder, u64)>,
}

impl StaleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unstamped frames are never stale.
    pub fn is_stale(&self, order: Option<&FrameOrder>) -> bool {
        let (Some(order), Some((command, applied_at))) = (order, &self.last_command) else {
            return false;
        };
        match self.last_heard.get(&order.from) {
            Some(heard_at) => order < command && heard_at < applied_at,
            None => false,
        }
    }

    /// Records the reception of a frame accepted from `from`.
    pub fn heard(&mut self, from: &MemberId) {
        self.received += 1;
        self.last_heard.insert(from.clone(), self.received);
    }

    /// Records a discrete command applied to the local player. Only a newer
    /// command moves the mark.
    pub fn record_command(&mut self, order: Option<FrameOrder>) {
        let Some(order) = order else {
            return;
        };
        match &self.last_command {
            Some((last, _)) if *last >= order => {}
            _ => self.last_command = Some((order, self.received)),
        }
    }

    pub fn last_command(&self) -> Option<&FrameOrder> {
        self.last_command.as_ref().map(|(order, _)| order)
    }

    pub fn reset(&mut self) {
        self.received = 0;
        self.last_heard.clear();
        self.last_command = None;
    }
}
