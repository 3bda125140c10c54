//! # pmosync - Synchronisation de lecture pour salons de visionnage
//!
//! Keeps the play/pause state and position of several independent media
//! players consistent across the members of a watch room.
//!
//! - [`reconciler`]: the Local Reconciliation Engine. Decides what to
//!   broadcast after a local player event and how to apply a remote frame
//!   without oscillation.
//! - [`authority`]: the Authority Gate. Playback control is open to every
//!   member; content changes (`play:change`) are leader-only.
//! - [`session`]: the per-member event loop wiring both to a
//!   [`RoomTransport`] and a [`MediaPlayer`].
//!
//! ## Exemple
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use pmosync::{ContentInfo, LocalRoom, MemberId, SimulatedPlayer, SyncSession, SyncSettings};
//!
//! # async fn demo() -> Result<(), pmosync::SyncError> {
//! let room = LocalRoom::new();
//! let alice = room.connect(MemberId::new("alice"));
//! alice.join()?;
//!
//! let player = Arc::new(Mutex::new(SimulatedPlayer::new("alice")));
//! let handle = SyncSession::new(Arc::new(alice), SyncSettings::default())
//!     .with_player(player.clone())
//!     .with_content(ContentInfo::new("603", "vidsrc", "https://cdn.example/603.m3u8"))
//!     .spawn();
//!
//! player.lock().user_play();
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod authority;
pub mod capabilities;
pub mod debounce;
pub mod disposer;
pub mod echo;
pub mod errors;
pub mod local_room;
pub mod logs;
pub mod model;
pub mod ordering;
pub mod protocol;
pub mod reconciler;
pub mod session;
pub mod settings;
pub mod simulated_player;

pub use authority::{AuthorityGate, ChangeDecision, ContentChangeWatcher};
pub use capabilities::{MediaPlayer, RoomTransport, SharedPlayer, shared_player};
pub use disposer::{Disposer, DisposerBag};
pub use errors::SyncError;
pub use local_room::{LocalRoom, LocalTransport};
pub use model::{
    ContentInfo, ContentKey, MemberId, MemberRole, PlayState, PlayerCommand, PlayerEventKind,
    RoomMembership,
};
pub use protocol::{Envelope, SyncMessage, Topic, WireFrame};
pub use reconciler::{IgnoreReason, InboundOutcome, Outbound, Reconciler, SyncContext};
pub use session::{SessionEvent, SyncHandle, SyncSession};
pub use settings::SyncSettings;
pub use simulated_player::SimulatedPlayer;
