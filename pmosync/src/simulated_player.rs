//! In-process [`MediaPlayer`] driven by the tokio clock.
//!
//! The position advances with `tokio::time::Instant`, so tests running with a
//! paused clock control it exactly. Like a browser media element it only
//! emits `play`/`pause` on an actual state change, always emits `seeked`,
//! and may refuse `play()` while autoplay is blocked. User actions
//! (`user_*`) bypass the autoplay policy and are not recorded in the
//! command log.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::trace;

use crate::capabilities::MediaPlayer;
use crate::disposer::Disposer;
use crate::errors::SyncError;
use crate::model::{PlayerCommand, PlayerEventKind, validate_position};

#[derive(Default)]
struct Listeners {
    next_id: u64,
    sinks: Vec<(u64, PlayerEventKind, mpsc::UnboundedSender<PlayerEventKind>)>,
}

pub struct SimulatedPlayer {
    name: String,
    ready: bool,
    autoplay_blocked: bool,
    paused: bool,
    anchor_position: f64,
    anchor_at: Instant,
    commands: Vec<PlayerCommand>,
    listeners: Arc<Mutex<Listeners>>,
}

impl SimulatedPlayer {
    /// A ready, paused player at position zero.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ready: true,
            autoplay_blocked: false,
            paused: true,
            anchor_position: 0.0,
            anchor_at: Instant::now(),
            commands: Vec::new(),
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    /// A player whose media element is not initialized yet.
    pub fn loading(name: impl Into<String>) -> Self {
        Self {
            ready: false,
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn block_autoplay(&mut self, blocked: bool) {
        self.autoplay_blocked = blocked;
    }

    pub fn position(&self) -> f64 {
        if self.paused {
            self.anchor_position
        } else {
            self.anchor_position + self.anchor_at.elapsed().as_secs_f64()
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Commands received through [`MediaPlayer`], refused ones included.
    pub fn commands(&self) -> &[PlayerCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<PlayerCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().sinks.len()
    }

    pub fn user_play(&mut self) {
        self.resume();
    }

    pub fn user_pause(&mut self) {
        self.suspend();
    }

    pub fn user_seek(&mut self, seconds: f64) {
        self.jump(seconds.max(0.0));
    }

    fn resume(&mut self) {
        if self.paused {
            self.anchor_at = Instant::now();
            self.paused = false;
            self.emit(PlayerEventKind::Play);
        }
    }

    fn suspend(&mut self) {
        if !self.paused {
            self.anchor_position = self.position();
            self.anchor_at = Instant::now();
            self.paused = true;
            self.emit(PlayerEventKind::Pause);
        }
    }

    fn jump(&mut self, seconds: f64) {
        self.anchor_position = seconds;
        self.anchor_at = Instant::now();
        self.emit(PlayerEventKind::Seeked);
    }

    fn emit(&self, kind: PlayerEventKind) {
        trace!(player = %self.name, event = %kind, "Player event");
        let mut listeners = self.listeners.lock();
        listeners
            .sinks
            .retain(|(_, k, sink)| *k != kind || sink.send(kind).is_ok());
    }
}

impl MediaPlayer for SimulatedPlayer {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn current_time(&self) -> Result<f64, SyncError> {
        if !self.ready {
            return Err(SyncError::PlayerNotReady);
        }
        Ok(self.position())
    }

    fn set_current_time(&mut self, seconds: f64) -> Result<(), SyncError> {
        self.commands.push(PlayerCommand::Seek(seconds));
        if !self.ready {
            return Err(SyncError::PlayerNotReady);
        }
        validate_position(seconds)?;
        self.jump(seconds);
        Ok(())
    }

    fn paused(&self) -> Result<bool, SyncError> {
        if !self.ready {
            return Err(SyncError::PlayerNotReady);
        }
        Ok(self.paused)
    }

    fn play(&mut self) -> Result<(), SyncError> {
        self.commands.push(PlayerCommand::Play);
        if !self.ready {
            return Err(SyncError::PlayerNotReady);
        }
        if self.autoplay_blocked {
            return Err(SyncError::play_rejected("autoplay blocked"));
        }
        self.resume();
        Ok(())
    }

    fn pause(&mut self) -> Result<(), SyncError> {
        self.commands.push(PlayerCommand::Pause);
        if !self.ready {
            return Err(SyncError::PlayerNotReady);
        }
        self.suspend();
        Ok(())
    }

    fn subscribe(
        &mut self,
        kind: PlayerEventKind,
        sink: mpsc::UnboundedSender<PlayerEventKind>,
    ) -> Disposer {
        let id = {
            let mut listeners = self.listeners.lock();
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.sinks.push((id, kind, sink));
            id
        };
        let listeners = Arc::clone(&self.listeners);
        Disposer::new(move || {
            listeners.lock().sinks.retain(|(i, _, _)| *i != id);
        })
    }
}
