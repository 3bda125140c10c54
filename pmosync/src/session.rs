//! Boucle d'événements d'un membre.
//!
//! A [`SyncSession`] owns the [`Reconciler`] and the content-change watcher
//! and drives them from a single task. Everything that can wake the engine
//! arrives on that task:
//!
//! - membership changes (room transport `watch` channel),
//! - inbound frames (one subscription per topic, while in a room),
//! - player lifecycle events (one subscription per kind, while in a room
//!   and a player is attached),
//! - the heartbeat interval, the content-change deadline and the deferred
//!   snapshot deadline,
//! - commands from the application through a [`SyncHandle`].
//!
//! Leaving the room releases every subscription and timer; joining again
//! registers them from a clean state.

use std::future::pending;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::authority::{AuthorityGate, ContentChangeWatcher};
use crate::capabilities::{RoomTransport, SharedPlayer};
use crate::disposer::DisposerBag;
use crate::errors::SyncError;
use crate::model::{ContentInfo, MemberRole, PlayState, PlayerEventKind, RoomMembership};
use crate::protocol::{Envelope, SyncMessage, Topic};
use crate::reconciler::{InboundOutcome, Outbound, Reconciler, SyncContext, snapshot};
use crate::settings::SyncSettings;

const EVENT_CAPACITY: usize = 64;

/// Notifications for the surrounding application.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The leader announced other content: navigate to it, then bind it
    /// with [`SyncHandle::set_content`].
    Navigate(PlayState),
    RoleChanged(MemberRole),
}

enum SessionCommand {
    AttachPlayer(SharedPlayer),
    DetachPlayer,
    SetContent(Option<ContentInfo>),
    BroadcastNow,
}

/// Builder of the per-member engine task.
pub struct SyncSession {
    transport: Arc<dyn RoomTransport>,
    settings: SyncSettings,
    player: Option<SharedPlayer>,
    content: Option<ContentInfo>,
}

impl SyncSession {
    pub fn new(transport: Arc<dyn RoomTransport>, settings: SyncSettings) -> Self {
        Self {
            transport,
            settings,
            player: None,
            content: None,
        }
    }

    pub fn with_player(mut self, player: SharedPlayer) -> Self {
        self.player = Some(player);
        self
    }

    pub fn with_content(mut self, content: ContentInfo) -> Self {
        self.content = Some(content);
        self
    }

    /// Starts the engine on the current tokio runtime.
    pub fn spawn(self) -> SyncHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();
        let membership = self.transport.membership();

        let engine = SessionLoop::new(self, events_tx.clone());
        let task = tokio::spawn(engine.run(commands_rx, cancel.clone()));

        SyncHandle {
            commands: commands_tx,
            events: events_tx,
            membership,
            cancel,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

/// Application side of a running [`SyncSession`].
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
    membership: watch::Receiver<RoomMembership>,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SyncHandle {
    pub fn is_in_room(&self) -> bool {
        self.membership.borrow().in_room
    }

    pub fn is_owner(&self) -> bool {
        let membership = *self.membership.borrow();
        membership.in_room && membership.is_leader
    }

    pub fn role(&self) -> MemberRole {
        self.membership.borrow().role()
    }

    /// Followers should not expose content or source selection.
    pub fn should_disable_controls(&self) -> bool {
        AuthorityGate::should_disable_controls(&self.membership.borrow())
    }

    pub fn attach_player(&self, player: SharedPlayer) -> Result<(), SyncError> {
        self.send(SessionCommand::AttachPlayer(player))
    }

    pub fn detach_player(&self) -> Result<(), SyncError> {
        self.send(SessionCommand::DetachPlayer)
    }

    /// Binds the content the local player shows.
    pub fn set_content(&self, content: ContentInfo) -> Result<(), SyncError> {
        self.send(SessionCommand::SetContent(Some(content)))
    }

    pub fn clear_content(&self) -> Result<(), SyncError> {
        self.send(SessionCommand::SetContent(None))
    }

    /// Sends a snapshot of the local player now, subject to the snapshot
    /// debounce.
    pub fn broadcast_current_state(&self) -> Result<(), SyncError> {
        self.send(SessionCommand::BroadcastNow)
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.commands.is_closed()
    }

    /// Stops the engine and waits for every listener to be released.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Sync session task ended abnormally: {}", e);
            }
        }
    }

    fn send(&self, command: SessionCommand) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::SessionClosed)
    }
}

struct SessionLoop {
    transport: Arc<dyn RoomTransport>,
    settings: SyncSettings,
    reconciler: Reconciler,
    watcher: ContentChangeWatcher,

    membership: RoomMembership,
    membership_rx: watch::Receiver<RoomMembership>,
    transport_open: bool,

    player: Option<SharedPlayer>,
    content: Option<ContentInfo>,

    room_subscriptions: DisposerBag,
    player_subscriptions: DisposerBag,
    inbound_tx: mpsc::UnboundedSender<Envelope>,
    inbound_rx: mpsc::UnboundedReceiver<Envelope>,
    player_tx: mpsc::UnboundedSender<PlayerEventKind>,
    player_rx: mpsc::UnboundedReceiver<PlayerEventKind>,

    heartbeat: Option<Interval>,
    snapshot_retry: Option<Instant>,

    events: broadcast::Sender<SessionEvent>,
}

impl SessionLoop {
    fn new(session: SyncSession, events: broadcast::Sender<SessionEvent>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (player_tx, player_rx) = mpsc::unbounded_channel();
        let membership_rx = session.transport.membership();

        Self {
            reconciler: Reconciler::new(&session.settings),
            watcher: ContentChangeWatcher::new(session.settings.change_debounce),
            transport: session.transport,
            settings: session.settings,
            membership: RoomMembership::idle(),
            membership_rx,
            transport_open: true,
            player: session.player,
            content: session.content,
            room_subscriptions: DisposerBag::new(),
            player_subscriptions: DisposerBag::new(),
            inbound_tx,
            inbound_rx,
            player_tx,
            player_rx,
            heartbeat: None,
            snapshot_retry: None,
            events,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        cancel: CancellationToken,
    ) {
        let now = Instant::now();
        if let Some(content) = &self.content {
            self.watcher.observe(content, &self.membership, now);
        }
        let initial = *self.membership_rx.borrow_and_update();
        self.on_membership(initial);

        info!(role = %self.membership.role(), "Sync session started");

        loop {
            let watching = self.transport_open;
            let content_deadline = self.watcher.deadline();
            let snapshot_deadline = self.snapshot_retry;

            tokio::select! {
                _ = cancel.cancelled() => break,

                changed = self.membership_rx.changed(), if watching => {
                    match changed {
                        Ok(()) => {
                            let membership = *self.membership_rx.borrow_and_update();
                            self.on_membership(membership);
                        }
                        Err(_) => {
                            warn!("Room transport closed, leaving room");
                            self.transport_open = false;
                            self.on_membership(RoomMembership::idle());
                        }
                    }
                }

                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("Every sync handle dropped");
                        break;
                    }
                },

                Some(envelope) = self.inbound_rx.recv() => self.on_inbound(envelope),

                Some(kind) = self.player_rx.recv() => self.on_player_event(kind),

                _ = tick(&mut self.heartbeat) => self.on_heartbeat(),

                _ = sleep_until_some(content_deadline) => self.on_content_deadline(),

                _ = sleep_until_some(snapshot_deadline) => self.on_snapshot_retry(),
            }
        }

        self.leave_room();
        self.detach_player();
        info!("Sync session stopped");
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    fn on_membership(&mut self, next: RoomMembership) {
        let previous = self.membership;
        if previous == next {
            return;
        }
        self.membership = next;

        match (previous.in_room, next.in_room) {
            (false, true) => {
                info!(role = %next.role(), "Joined room");
                self.enter_room();
            }
            (true, false) => {
                info!("Left room");
                self.leave_room();
            }
            _ => info!(from = %previous.role(), to = %next.role(), "Role changed"),
        }

        if previous.role() != next.role() {
            if self.events.send(SessionEvent::RoleChanged(next.role())).is_err() {
                trace!("No listener for role changes");
            }
        }

        let now = Instant::now();
        if AuthorityGate::may_broadcast_change(&next) {
            if !AuthorityGate::may_broadcast_change(&previous) {
                if let Some(content) = &self.content {
                    self.watcher.announce(content, &next, now);
                }
            }
        } else {
            self.watcher.cancel();
        }
    }

    fn enter_room(&mut self) {
        for topic in Topic::ALL {
            let disposer = self.transport.subscribe(topic, self.inbound_tx.clone());
            self.room_subscriptions.push(disposer);
        }
        self.listen_player();

        let period = self.settings.heartbeat;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);
    }

    fn leave_room(&mut self) {
        self.room_subscriptions.dispose_all();
        self.player_subscriptions.dispose_all();
        self.heartbeat = None;
        self.snapshot_retry = None;
        self.watcher.cancel();
        self.reconciler.reset();

        // frames and events queued before leaving must not leak into the
        // next membership
        while self.inbound_rx.try_recv().is_ok() {}
        while self.player_rx.try_recv().is_ok() {}
    }

    // ------------------------------------------------------------------
    // Player
    // ------------------------------------------------------------------

    fn listen_player(&mut self) {
        if !self.membership.in_room || !self.player_subscriptions.is_empty() {
            return;
        }
        let Some(player) = &self.player else {
            return;
        };
        let mut guard = player.lock();
        for kind in PlayerEventKind::ALL {
            let disposer = guard.subscribe(kind, self.player_tx.clone());
            self.player_subscriptions.push(disposer);
        }
    }

    fn attach_player(&mut self, player: SharedPlayer) {
        self.detach_player();
        self.player = Some(player);
        self.listen_player();
        debug!("Player attached");
    }

    fn detach_player(&mut self) {
        self.player_subscriptions.dispose_all();
        self.snapshot_retry = None;
        while self.player_rx.try_recv().is_ok() {}
        if self.player.take().is_some() {
            debug!("Player detached");
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn on_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::AttachPlayer(player) => self.attach_player(player),
            SessionCommand::DetachPlayer => self.detach_player(),
            SessionCommand::SetContent(content) => self.set_content(content),
            SessionCommand::BroadcastNow => {
                let now = Instant::now();
                let ctx = SyncContext::new(self.membership, self.content.as_ref());
                let out = match &self.player {
                    Some(player) => {
                        let guard = player.lock();
                        self.reconciler.request_snapshot(Some(&*guard), &ctx, now)
                    }
                    None => self.reconciler.request_snapshot(None, &ctx, now),
                };
                self.dispatch(out);
            }
        }
    }

    fn set_content(&mut self, content: Option<ContentInfo>) {
        self.content = content;
        if let Some(content) = &self.content {
            let decision = self
                .watcher
                .observe(content, &self.membership, Instant::now());
            trace!(video_id = %content.video_id, ?decision, "Content bound");
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    fn on_player_event(&mut self, kind: PlayerEventKind) {
        let Some(player) = &self.player else {
            return;
        };
        let now = Instant::now();
        let ctx = SyncContext::new(self.membership, self.content.as_ref());
        let out = {
            let guard = player.lock();
            self.reconciler.on_player_event(kind, &*guard, &ctx, now)
        };
        self.dispatch(out);
    }

    fn on_inbound(&mut self, envelope: Envelope) {
        let now = Instant::now();
        let ctx = SyncContext::new(self.membership, self.content.as_ref());
        let outcome = match &self.player {
            Some(player) => {
                let mut guard = player.lock();
                self.reconciler
                    .on_inbound(&envelope, Some(&mut *guard), &ctx, now)
            }
            None => self.reconciler.on_inbound(&envelope, None, &ctx, now),
        };

        match outcome {
            InboundOutcome::Navigate(state) => {
                if self.events.send(SessionEvent::Navigate(state)).is_err() {
                    warn!("Content change received but nobody handles navigation");
                }
            }
            InboundOutcome::Applied(_) => {}
            InboundOutcome::Ignored(reason) => {
                trace!(topic = %envelope.message.topic(), ?reason, "Inbound frame ignored");
            }
        }
    }

    fn on_heartbeat(&mut self) {
        let now = Instant::now();
        let ctx = SyncContext::new(self.membership, self.content.as_ref());
        let message = match &self.player {
            Some(player) => {
                let guard = player.lock();
                self.reconciler.on_heartbeat(Some(&*guard), &ctx, now)
            }
            None => None,
        };
        if let Some(message) = message {
            self.send(message);
        }
    }

    fn on_snapshot_retry(&mut self) {
        self.snapshot_retry = None;
        let now = Instant::now();
        let ctx = SyncContext::new(self.membership, self.content.as_ref());
        let out = match &self.player {
            Some(player) => {
                let guard = player.lock();
                self.reconciler.request_snapshot(Some(&*guard), &ctx, now)
            }
            None => Outbound::default(),
        };
        self.dispatch(out);
    }

    fn on_content_deadline(&mut self) {
        let Some(content) = self.watcher.fire(&self.membership, Instant::now()) else {
            return;
        };
        let state = self
            .player
            .as_ref()
            .and_then(|player| snapshot(&*player.lock(), &content).ok())
            .unwrap_or_else(|| PlayState::new(content.clone(), 0.0, false));

        info!(
            video_id = %content.video_id,
            episode = content.effective_episode(),
            source = %content.source,
            "Announcing content change"
        );
        self.send(SyncMessage::Change(state));
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    fn dispatch(&mut self, out: Outbound) {
        for message in out.messages {
            self.send(message);
        }
        if let Some(at) = out.retry_snapshot_at {
            self.snapshot_retry = Some(self.snapshot_retry.map_or(at, |pending| pending.min(at)));
        }
    }

    fn send(&mut self, message: SyncMessage) {
        let stamp = self.reconciler.next_stamp();
        match self.transport.send(&message, Some(stamp)) {
            Ok(()) => trace!(topic = %message.topic(), stamp, "Frame sent"),
            Err(e) if e.is_transient() => debug!(topic = %message.topic(), "Frame not sent: {}", e),
            Err(e) => warn!(topic = %message.topic(), "Frame not sent: {}", e),
        }
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending::<()>().await,
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}
