//! In-memory room service.
//!
//! [`LocalRoom`] plays the part of the real-time room backend for tests and
//! the demo binary: it tracks who joined, assigns leadership, and relays
//! frames between members. Every frame goes through its JSON wire form, so
//! members only ever see what a real connection would carry.
//!
//! Leadership rules: the first member to join leads; when the leader leaves,
//! the next joined member (by id) takes over. [`LocalRoom::set_leader`]
//! reassigns it explicitly.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::capabilities::RoomTransport;
use crate::disposer::Disposer;
use crate::errors::SyncError;
use crate::model::{MemberId, RoomMembership};
use crate::protocol::{Envelope, SyncMessage, Topic, WireFrame};

struct MemberSlot {
    joined: bool,
    membership: watch::Sender<RoomMembership>,
    handlers: Vec<(u64, Topic, mpsc::UnboundedSender<Envelope>)>,
}

#[derive(Default)]
struct RoomState {
    leader: Option<MemberId>,
    members: BTreeMap<MemberId, MemberSlot>,
    next_handler: u64,
    relayed: u64,
}

impl RoomState {
    fn publish(&self) {
        for (id, slot) in &self.members {
            let membership = if !slot.joined {
                RoomMembership::idle()
            } else if self.leader.as_ref() == Some(id) {
                RoomMembership::leader()
            } else {
                RoomMembership::follower()
            };
            slot.membership.send_if_modified(|current| {
                let changed = *current != membership;
                *current = membership;
                changed
            });
        }
    }

    fn elect(&mut self) {
        let leader_present = self
            .leader
            .as_ref()
            .and_then(|id| self.members.get(id))
            .is_some_and(|slot| slot.joined);
        if !leader_present {
            self.leader = self
                .members
                .iter()
                .find(|(_, slot)| slot.joined)
                .map(|(id, _)| id.clone());
            if let Some(leader) = &self.leader {
                info!(leader = %leader, "Room leader assigned");
            }
        }
    }

    /// Delivers one encoded frame to every other joined member.
    fn relay(&mut self, from: &MemberId, text: &str) -> Result<usize, SyncError> {
        let (message, stamp) = WireFrame::decode(text)?;
        let topic = message.topic();
        let mut envelope = Envelope::new(from.clone(), message);
        envelope.from_leader = self.leader.as_ref() == Some(from);
        envelope.stamp = stamp;

        let mut delivered = 0;
        for (id, slot) in self.members.iter_mut() {
            if id == from || !slot.joined {
                continue;
            }
            slot.handlers.retain(|(_, t, sink)| {
                if *t != topic {
                    return true;
                }
                let alive = sink.send(envelope.clone()).is_ok();
                if alive {
                    delivered += 1;
                }
                alive
            });
        }
        self.relayed += 1;
        trace!(from = %from, topic = %topic, delivered, "Frame relayed");
        Ok(delivered)
    }
}

/// Shared handle on one in-memory room.
#[derive(Clone, Default)]
pub struct LocalRoom {
    state: Arc<Mutex<RoomState>>,
}

impl LocalRoom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a member connection. The member starts outside the room.
    pub fn connect(&self, id: MemberId) -> LocalTransport {
        let mut state = self.state.lock();
        let receiver = match state.members.get(&id) {
            Some(slot) => slot.membership.subscribe(),
            None => {
                let (sender, receiver) = watch::channel(RoomMembership::idle());
                state.members.insert(
                    id.clone(),
                    MemberSlot {
                        joined: false,
                        membership: sender,
                        handlers: Vec::new(),
                    },
                );
                receiver
            }
        };
        LocalTransport {
            id,
            room: self.clone(),
            membership: receiver,
        }
    }

    pub fn join(&self, id: &MemberId) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        let slot = state
            .members
            .get_mut(id)
            .ok_or(SyncError::TransportUnavailable)?;
        slot.joined = true;
        debug!(member = %id, "Member joined");
        state.elect();
        state.publish();
        Ok(())
    }

    pub fn leave(&self, id: &MemberId) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        let slot = state
            .members
            .get_mut(id)
            .ok_or(SyncError::TransportUnavailable)?;
        slot.joined = false;
        debug!(member = %id, "Member left");
        state.elect();
        state.publish();
        Ok(())
    }

    pub fn set_leader(&self, id: &MemberId) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        match state.members.get(id) {
            Some(slot) if slot.joined => {
                state.leader = Some(id.clone());
                info!(leader = %id, "Room leader reassigned");
                state.publish();
                Ok(())
            }
            _ => Err(SyncError::TransportUnavailable),
        }
    }

    pub fn leader(&self) -> Option<MemberId> {
        self.state.lock().leader.clone()
    }

    pub fn joined_members(&self) -> Vec<MemberId> {
        self.state
            .lock()
            .members
            .iter()
            .filter(|(_, slot)| slot.joined)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Frames relayed since the room was created.
    pub fn relayed(&self) -> u64 {
        self.state.lock().relayed
    }

    /// Handlers currently registered for `id`.
    pub fn handler_count(&self, id: &MemberId) -> usize {
        self.state
            .lock()
            .members
            .get(id)
            .map_or(0, |slot| slot.handlers.len())
    }

    /// Relays a raw JSON frame as if `from` had sent it.
    pub fn inject(&self, from: &MemberId, text: &str) -> Result<usize, SyncError> {
        self.state.lock().relay(from, text)
    }
}

/// A member's connection to a [`LocalRoom`].
pub struct LocalTransport {
    id: MemberId,
    room: LocalRoom,
    membership: watch::Receiver<RoomMembership>,
}

impl LocalTransport {
    pub fn id(&self) -> &MemberId {
        &self.id
    }

    pub fn join(&self) -> Result<(), SyncError> {
        self.room.join(&self.id)
    }

    pub fn leave(&self) -> Result<(), SyncError> {
        self.room.leave(&self.id)
    }
}

impl RoomTransport for LocalTransport {
    fn membership(&self) -> watch::Receiver<RoomMembership> {
        self.membership.clone()
    }

    fn subscribe(&self, topic: Topic, sink: mpsc::UnboundedSender<Envelope>) -> Disposer {
        let mut state = self.room.state.lock();
        let handler = state.next_handler;
        state.next_handler += 1;
        let Some(slot) = state.members.get_mut(&self.id) else {
            return Disposer::noop();
        };
        slot.handlers.push((handler, topic, sink));

        let room = self.room.clone();
        let id = self.id.clone();
        Disposer::new(move || {
            if let Some(slot) = room.state.lock().members.get_mut(&id) {
                slot.handlers.retain(|(h, _, _)| *h != handler);
            }
        })
    }

    fn send(&self, message: &SyncMessage, stamp: Option<u64>) -> Result<(), SyncError> {
        let text = message.encode(stamp)?;
        let mut state = self.room.state.lock();
        let joined = state.members.get(&self.id).is_some_and(|slot| slot.joined);
        if !joined {
            return Err(SyncError::TransportUnavailable);
        }
        if let Err(e) = state.relay(&self.id, &text) {
            warn!(member = %self.id, "Frame rejected by the room: {}", e);
            return Err(e);
        }
        Ok(())
    }
}
