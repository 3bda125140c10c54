// pmosync/src/capabilities.rs
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::disposer::Disposer;
use crate::errors::SyncError;
use crate::model::{PlayState, PlayerEventKind, RoomMembership};
use crate::protocol::{Envelope, SyncMessage, Topic};

/// Abstraction du lecteur vidéo local.
///
/// Le lecteur est manipulé par le moteur de synchronisation et par
/// l'utilisateur; les deux passent par la même boucle d'événements.
pub trait MediaPlayer: Send {
    /// False until the underlying media element is initialized.
    fn is_ready(&self) -> bool;

    /// Position courante en secondes.
    fn current_time(&self) -> Result<f64, SyncError>;

    /// Expected to fire `seeked` once the position is reached. A player may
    /// skip it when the position does not change; the engine then recognizes
    /// its own seeks by their target.
    fn set_current_time(&mut self, seconds: f64) -> Result<(), SyncError>;

    fn paused(&self) -> Result<bool, SyncError>;

    /// May be refused by the platform (autoplay policy).
    fn play(&mut self) -> Result<(), SyncError>;

    fn pause(&mut self) -> Result<(), SyncError>;

    /// Forwards every `kind` event to `sink` until the disposer is released.
    fn subscribe(&mut self, kind: PlayerEventKind, sink: mpsc::UnboundedSender<PlayerEventKind>)
    -> Disposer;
}

pub type SharedPlayer = Arc<Mutex<dyn MediaPlayer>>;

pub fn shared_player<P: MediaPlayer + 'static>(player: P) -> SharedPlayer {
    Arc::new(Mutex::new(player))
}

/// Connexion au service de salon (membership + messagerie).
pub trait RoomTransport: Send + Sync {
    /// Current membership, updated by the room service.
    fn membership(&self) -> watch::Receiver<RoomMembership>;

    /// Forwards every frame received on `topic` to `sink` until the disposer
    /// is released. Without a connection this returns a no-op disposer.
    fn subscribe(&self, topic: Topic, sink: mpsc::UnboundedSender<Envelope>) -> Disposer;

    /// Fire-and-forget delivery to every other member of the room.
    fn send(&self, message: &SyncMessage, stamp: Option<u64>) -> Result<(), SyncError>;

    fn send_update(&self, state: PlayState, stamp: Option<u64>) -> Result<(), SyncError> {
        self.send(&SyncMessage::Update(state), stamp)
    }

    fn send_play(&self, stamp: Option<u64>) -> Result<(), SyncError> {
        self.send(&SyncMessage::Play, stamp)
    }

    fn send_pause(&self, stamp: Option<u64>) -> Result<(), SyncError> {
        self.send(&SyncMessage::Pause, stamp)
    }

    fn send_seek(&self, position: f64, stamp: Option<u64>) -> Result<(), SyncError> {
        self.send(&SyncMessage::Seek(position), stamp)
    }

    fn send_change(&self, state: PlayState, stamp: Option<u64>) -> Result<(), SyncError> {
        self.send(&SyncMessage::Change(state), stamp)
    }
}
