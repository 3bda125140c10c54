//! Local Reconciliation Engine
//!
//! Pure decision logic, without I/O: the session loop feeds it player events,
//! inbound envelopes and timer ticks together with the current instant, and
//! performs whatever it returns (frames to send, deferred snapshot).
//!
//! ## Outbound
//!
//! | local event | confirmed by      | frames sent                          |
//! |-------------|-------------------|--------------------------------------|
//! | `play`      | `!player.paused`  | `play:play`, then `play:update`*     |
//! | `pause`     | `player.paused`   | `play:pause`, then `play:update`*    |
//! | `seeked`    | -                 | `play:seek` (position only)          |
//! | heartbeat   | playing           | `play:update`*                       |
//!
//! `*` subject to the snapshot debounce.
//!
//! ## Inbound
//!
//! Snapshots are reconciled, never replayed: play/pause is only issued when
//! the remote and local states disagree, and a seek only when the positions
//! differ by more than the drift tolerance. Discrete commands are idempotent.

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::authority::AuthorityGate;
use crate::capabilities::MediaPlayer;
use crate::debounce::BroadcastDebounce;
use crate::echo::EchoGuard;
use crate::errors::SyncError;
use crate::model::{ContentInfo, PlayState, PlayerCommand, PlayerEventKind, RoomMembership};
use crate::ordering::{FrameOrder, LamportClock, StaleFilter};
use crate::protocol::{Envelope, SyncMessage};
use crate::settings::SyncSettings;

/// What the engine knows about its surroundings for one decision.
#[derive(Debug, Clone, Copy)]
pub struct SyncContext<'a> {
    pub membership: RoomMembership,
    pub content: Option<&'a ContentInfo>,
}

impl<'a> SyncContext<'a> {
    pub fn new(membership: RoomMembership, content: Option<&'a ContentInfo>) -> Self {
        Self {
            membership,
            content,
        }
    }
}

/// Frames to broadcast after a local decision.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Outbound {
    pub messages: Vec<SyncMessage>,
    /// Set when a snapshot was debounced and should be retried at that instant.
    pub retry_snapshot_at: Option<Instant>,
}

impl Outbound {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.retry_snapshot_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotInRoom,
    NotFromLeader,
    AlreadyCurrent,
    Stale,
    PlayerNotReady,
    PlayerError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// Commands issued to the local player; empty when already in sync.
    Applied(Vec<PlayerCommand>),
    /// The leader switched content: the application must navigate.
    Navigate(PlayState),
    Ignored(IgnoreReason),
}

/// Builds a snapshot of the local player for the bound content.
pub fn snapshot(player: &dyn MediaPlayer, content: &ContentInfo) -> Result<PlayState, SyncError> {
    if !player.is_ready() {
        return Err(SyncError::PlayerNotReady);
    }
    let current_time = player.current_time()?;
    let is_playing = !player.paused()?;
    Ok(PlayState::new(content.clone(), current_time, is_playing))
}

#[derive(Debug)]
pub struct Reconciler {
    drift_tolerance_secs: f64,
    trailing_snapshot: bool,
    debounce: BroadcastDebounce,
    echo: EchoGuard,
    clock: LamportClock,
    stale: StaleFilter,
}

impl Reconciler {
    pub fn new(settings: &SyncSettings) -> Self {
        Self {
            drift_tolerance_secs: settings.drift_tolerance_secs,
            trailing_snapshot: settings.trailing_snapshot,
            debounce: BroadcastDebounce::new(settings.debounce),
            echo: EchoGuard::new(settings.echo_window),
            clock: LamportClock::new(),
            stale: StaleFilter::new(),
        }
    }

    /// Stamp for the next outgoing frame.
    pub fn next_stamp(&mut self) -> u64 {
        self.clock.tick()
    }

    pub fn last_broadcast_at(&self) -> Option<Instant> {
        self.debounce.last_sent_at()
    }

    /// Drops the per-membership state. The Lamport clock keeps counting.
    pub fn reset(&mut self) {
        self.debounce.reset();
        self.echo.clear();
        self.stale.reset();
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    pub fn on_player_event(
        &mut self,
        kind: PlayerEventKind,
        player: &dyn MediaPlayer,
        ctx: &SyncContext<'_>,
        now: Instant,
    ) -> Outbound {
        let mut out = Outbound::default();
        if !AuthorityGate::may_broadcast_playback(&ctx.membership) {
            return out;
        }
        let position = match kind {
            PlayerEventKind::Seeked => player.current_time().ok(),
            _ => None,
        };
        if self.echo.consume(kind, position, now) {
            trace!(event = %kind, "Echo of an applied command, not broadcast");
            return out;
        }
        if !player.is_ready() {
            return out;
        }

        match kind {
            PlayerEventKind::Play | PlayerEventKind::Pause => {
                let paused = match player.paused() {
                    Ok(paused) => paused,
                    Err(err) => {
                        debug!(event = %kind, "Cannot read player state: {}", err);
                        return out;
                    }
                };
                let confirmed = match kind {
                    PlayerEventKind::Play => !paused,
                    _ => paused,
                };
                if !confirmed {
                    debug!(event = %kind, paused, "Stale player event, ignored");
                    return out;
                }
                out.messages.push(match kind {
                    PlayerEventKind::Play => SyncMessage::Play,
                    _ => SyncMessage::Pause,
                });
                self.push_snapshot(&mut out, player, ctx, now);
            }
            PlayerEventKind::Seeked => match player.current_time() {
                Ok(position) => out.messages.push(SyncMessage::Seek(position)),
                Err(err) => debug!("Cannot read player position after seek: {}", err),
            },
        }
        out
    }

    /// Periodic snapshot, only while playing. A debounced heartbeat is skipped.
    pub fn on_heartbeat(
        &mut self,
        player: Option<&dyn MediaPlayer>,
        ctx: &SyncContext<'_>,
        now: Instant,
    ) -> Option<SyncMessage> {
        if !AuthorityGate::may_broadcast_playback(&ctx.membership) {
            return None;
        }
        let player = player.filter(|p| p.is_ready())?;
        if player.paused().unwrap_or(true) {
            return None;
        }
        let state = snapshot(player, ctx.content?).ok()?;
        match self.debounce.try_acquire(now) {
            Ok(()) => Some(SyncMessage::Update(state)),
            Err(_) => {
                trace!("Heartbeat skipped, a snapshot left recently");
                None
            }
        }
    }

    /// Snapshot requested outside of a player event (application request,
    /// deferred retry).
    pub fn request_snapshot(
        &mut self,
        player: Option<&dyn MediaPlayer>,
        ctx: &SyncContext<'_>,
        now: Instant,
    ) -> Outbound {
        let mut out = Outbound::default();
        if !AuthorityGate::may_broadcast_playback(&ctx.membership) {
            return out;
        }
        match player.filter(|p| p.is_ready()) {
            Some(player) => self.push_snapshot(&mut out, player, ctx, now),
            None => debug!("Snapshot requested without a ready player"),
        }
        out
    }

    fn push_snapshot(
        &mut self,
        out: &mut Outbound,
        player: &dyn MediaPlayer,
        ctx: &SyncContext<'_>,
        now: Instant,
    ) {
        let Some(content) = ctx.content else {
            debug!("No content bound, snapshot skipped");
            return;
        };
        let state = match snapshot(player, content) {
            Ok(state) => state,
            Err(err) => {
                debug!("Cannot build snapshot: {}", err);
                return;
            }
        };
        match self.debounce.try_acquire(now) {
            Ok(()) => out.messages.push(SyncMessage::Update(state)),
            Err(retry_at) => {
                trace!("Snapshot debounced");
                if self.trailing_snapshot {
                    out.retry_snapshot_at = Some(retry_at);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    pub fn on_inbound(
        &mut self,
        envelope: &Envelope,
        player: Option<&mut dyn MediaPlayer>,
        ctx: &SyncContext<'_>,
        now: Instant,
    ) -> InboundOutcome {
        if let Some(stamp) = envelope.stamp {
            self.clock.observe(stamp);
        }
        let topic = envelope.message.topic();

        if !ctx.membership.in_room {
            return InboundOutcome::Ignored(IgnoreReason::NotInRoom);
        }
        if !AuthorityGate::accepts(envelope) {
            warn!(from = %envelope.from, topic = %topic, "Content change from a non-leader member, ignored");
            return InboundOutcome::Ignored(IgnoreReason::NotFromLeader);
        }

        let order = envelope
            .stamp
            .map(|stamp| FrameOrder::new(stamp, envelope.from.clone()));

        if matches!(envelope.message, SyncMessage::Update(_)) && self.stale.is_stale(order.as_ref())
        {
            debug!(from = %envelope.from, stamp = ?envelope.stamp, "Stale snapshot dropped");
            return InboundOutcome::Ignored(IgnoreReason::Stale);
        }
        self.stale.heard(&envelope.from);

        if let SyncMessage::Change(state) = &envelope.message {
            if ctx.content.map(ContentInfo::key) == Some(state.content.key()) {
                debug!(video_id = %state.content.video_id, "Announced content already playing");
                return InboundOutcome::Ignored(IgnoreReason::AlreadyCurrent);
            }
            info!(
                from = %envelope.from,
                video_id = %state.content.video_id,
                episode = state.content.effective_episode(),
                source = %state.content.source,
                "Leader switched content"
            );
            return InboundOutcome::Navigate(state.clone());
        }

        let Some(player) = player.filter(|p| p.is_ready()) else {
            warn!(from = %envelope.from, topic = %topic, "Player not ready, message dropped");
            return InboundOutcome::Ignored(IgnoreReason::PlayerNotReady);
        };

        let result = match &envelope.message {
            SyncMessage::Update(state) => self.reconcile_snapshot(state, player, now),
            SyncMessage::Play => self.apply_play(player, now),
            SyncMessage::Pause => self.apply_pause(player, now),
            SyncMessage::Seek(position) => self
                .issue(PlayerCommand::Seek(*position), player, now)
                .map(|()| vec![PlayerCommand::Seek(*position)]),
            SyncMessage::Change(_) => Ok(Vec::new()),
        };

        match result {
            Ok(commands) => {
                if !commands.is_empty() {
                    debug!(from = %envelope.from, topic = %topic, ?commands, "Remote state applied");
                }
                if envelope.message.is_discrete() {
                    self.stale.record_command(order);
                }
                InboundOutcome::Applied(commands)
            }
            Err(err) => {
                warn!(from = %envelope.from, topic = %topic, "Cannot apply remote state: {}", err);
                InboundOutcome::Ignored(IgnoreReason::PlayerError)
            }
        }
    }

    fn reconcile_snapshot(
        &mut self,
        state: &PlayState,
        player: &mut dyn MediaPlayer,
        now: Instant,
    ) -> Result<Vec<PlayerCommand>, SyncError> {
        let mut commands = Vec::new();

        let paused = player.paused()?;
        if state.is_playing == paused {
            let command = if state.is_playing {
                PlayerCommand::Play
            } else {
                PlayerCommand::Pause
            };
            self.issue(command, player, now)?;
            commands.push(command);
        }

        let local = player.current_time()?;
        if (local - state.current_time).abs() > self.drift_tolerance_secs {
            let command = PlayerCommand::Seek(state.current_time);
            self.issue(command, player, now)?;
            commands.push(command);
        } else {
            trace!(local, remote = state.current_time, "Drift within tolerance");
        }

        Ok(commands)
    }

    fn apply_play(
        &mut self,
        player: &mut dyn MediaPlayer,
        now: Instant,
    ) -> Result<Vec<PlayerCommand>, SyncError> {
        if !player.paused()? {
            return Ok(Vec::new());
        }
        self.issue(PlayerCommand::Play, player, now)?;
        Ok(vec![PlayerCommand::Play])
    }

    fn apply_pause(
        &mut self,
        player: &mut dyn MediaPlayer,
        now: Instant,
    ) -> Result<Vec<PlayerCommand>, SyncError> {
        if player.paused()? {
            return Ok(Vec::new());
        }
        self.issue(PlayerCommand::Pause, player, now)?;
        Ok(vec![PlayerCommand::Pause])
    }

    /// Sends one command to the player and arms the matching echo filter.
    /// A refused `play` is logged and swallowed.
    fn issue(
        &mut self,
        command: PlayerCommand,
        player: &mut dyn MediaPlayer,
        now: Instant,
    ) -> Result<(), SyncError> {
        match command {
            PlayerCommand::Seek(target) => self.echo.expect_seek(target, now),
            _ => self.echo.expect(command.echo(), now),
        }
        let result = match command {
            PlayerCommand::Play => player.play(),
            PlayerCommand::Pause => player.pause(),
            PlayerCommand::Seek(position) => player.set_current_time(position),
        };
        match result {
            Ok(()) => Ok(()),
            Err(SyncError::PlayRejected(reason)) => {
                self.echo.forget(command.echo());
                warn!(%reason, "Player refused to start playback, waiting for next update");
                Ok(())
            }
            Err(err) => {
                self.echo.forget(command.echo());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemberId;
    use std::time::Duration;

    /// Minimal scripted player recording every command it receives.
    #[derive(Default)]
    struct FakePlayer {
        ready: bool,
        paused: bool,
        position: f64,
        refuse_play: bool,
        commands: Vec<PlayerCommand>,
    }

    impl FakePlayer {
        fn ready(paused: bool, position: f64) -> Self {
            Self {
                ready: true,
                paused,
                position,
                ..Default::default()
            }
        }
    }

    impl MediaPlayer for FakePlayer {
        fn is_ready(&self) -> bool {
            self.ready
        }
        fn current_time(&self) -> Result<f64, SyncError> {
            Ok(self.position)
        }
        fn set_current_time(&mut self, seconds: f64) -> Result<(), SyncError> {
            self.commands.push(PlayerCommand::Seek(seconds));
            self.position = seconds;
            Ok(())
        }
        fn paused(&self) -> Result<bool, SyncError> {
            Ok(self.paused)
        }
        fn play(&mut self) -> Result<(), SyncError> {
            self.commands.push(PlayerCommand::Play);
            if self.refuse_play {
                return Err(SyncError::play_rejected("NotAllowedError"));
            }
            self.paused = false;
            Ok(())
        }
        fn pause(&mut self) -> Result<(), SyncError> {
            self.commands.push(PlayerCommand::Pause);
            self.paused = true;
            Ok(())
        }
        fn subscribe(
            &mut self,
            _kind: PlayerEventKind,
            _sink: tokio::sync::mpsc::UnboundedSender<PlayerEventKind>,
        ) -> crate::disposer::Disposer {
            crate::disposer::Disposer::noop()
        }
    }

    fn content() -> ContentInfo {
        ContentInfo::new("603", "vidsrc", "https://cdn.example/603.m3u8").with_name("The Matrix")
    }

    fn remote(is_playing: bool, current_time: f64) -> Envelope {
        Envelope::new(
            MemberId::new("remote"),
            SyncMessage::Update(PlayState::new(content(), current_time, is_playing)),
        )
    }

    fn engine() -> Reconciler {
        Reconciler::new(&SyncSettings::default())
    }

    fn follower(content: &ContentInfo) -> SyncContext<'_> {
        SyncContext::new(RoomMembership::follower(), Some(content))
    }

    #[test]
    fn test_snapshot_in_sync_issues_nothing() {
        let content = content();
        let mut engine = engine();
        let mut player = FakePlayer::ready(false, 100.0);

        let outcome = engine.on_inbound(
            &remote(true, 101.9),
            Some(&mut player),
            &follower(&content),
            Instant::now(),
        );
        assert_eq!(outcome, InboundOutcome::Applied(vec![]));
        assert!(player.commands.is_empty());
    }

    #[test]
    fn test_snapshot_play_state_mismatch_issues_one_command() {
        let content = content();
        let mut engine = engine();

        let mut paused = FakePlayer::ready(true, 50.0);
        engine.on_inbound(&remote(true, 50.5), Some(&mut paused), &follower(&content), Instant::now());
        assert_eq!(paused.commands, vec![PlayerCommand::Play]);

        let mut playing = FakePlayer::ready(false, 50.0);
        engine.on_inbound(&remote(false, 49.0), Some(&mut playing), &follower(&content), Instant::now());
        assert_eq!(playing.commands, vec![PlayerCommand::Pause]);
    }

    #[test]
    fn test_snapshot_large_gap_seeks_once() {
        let content = content();
        let mut engine = engine();
        let mut player = FakePlayer::ready(false, 10.0);

        let outcome = engine.on_inbound(
            &remote(true, 13.0),
            Some(&mut player),
            &follower(&content),
            Instant::now(),
        );
        assert_eq!(outcome, InboundOutcome::Applied(vec![PlayerCommand::Seek(13.0)]));
        assert_eq!(player.commands, vec![PlayerCommand::Seek(13.0)]);
    }

    #[test]
    fn test_snapshot_resume_and_seek_together() {
        let content = content();
        let mut engine = engine();
        let mut player = FakePlayer::ready(true, 0.0);

        engine.on_inbound(&remote(true, 600.0), Some(&mut player), &follower(&content), Instant::now());
        assert_eq!(
            player.commands,
            vec![PlayerCommand::Play, PlayerCommand::Seek(600.0)]
        );
    }

    #[test]
    fn test_discrete_commands_are_idempotent() {
        let content = content();
        let ctx = follower(&content);
        let mut engine = engine();
        let mut player = FakePlayer::ready(false, 5.0);
        let from = MemberId::new("remote");

        engine.on_inbound(&Envelope::new(from.clone(), SyncMessage::Play), Some(&mut player), &ctx, Instant::now());
        assert!(player.commands.is_empty());

        engine.on_inbound(&Envelope::new(from.clone(), SyncMessage::Pause), Some(&mut player), &ctx, Instant::now());
        engine.on_inbound(&Envelope::new(from.clone(), SyncMessage::Pause), Some(&mut player), &ctx, Instant::now());
        assert_eq!(player.commands, vec![PlayerCommand::Pause]);

        // explicit seek, even within drift tolerance
        engine.on_inbound(&Envelope::new(from, SyncMessage::Seek(5.5)), Some(&mut player), &ctx, Instant::now());
        assert_eq!(
            player.commands,
            vec![PlayerCommand::Pause, PlayerCommand::Seek(5.5)]
        );
    }

    #[test]
    fn test_player_not_ready_drops_message() {
        let content = content();
        let mut engine = engine();
        let mut player = FakePlayer::default();

        let outcome = engine.on_inbound(&remote(true, 40.0), Some(&mut player), &follower(&content), Instant::now());
        assert_eq!(outcome, InboundOutcome::Ignored(IgnoreReason::PlayerNotReady));

        let outcome = engine.on_inbound(&remote(true, 40.0), None, &follower(&content), Instant::now());
        assert_eq!(outcome, InboundOutcome::Ignored(IgnoreReason::PlayerNotReady));
        assert!(player.commands.is_empty());
    }

    #[test]
    fn test_rejected_play_still_corrects_position() {
        let content = content();
        let mut engine = engine();
        let mut player = FakePlayer::ready(true, 0.0);
        player.refuse_play = true;

        let now = Instant::now();
        let outcome = engine.on_inbound(&remote(true, 30.0), Some(&mut player), &follower(&content), now);
        assert_eq!(
            outcome,
            InboundOutcome::Applied(vec![PlayerCommand::Play, PlayerCommand::Seek(30.0)])
        );
        assert!(player.paused);

        // no stale "play" expectation left behind: a later user play is broadcast
        player.refuse_play = false;
        player.paused = false;
        let out = engine.on_player_event(PlayerEventKind::Play, &player, &follower(&content), now);
        assert_eq!(out.messages.first(), Some(&SyncMessage::Play));
    }

    #[test]
    fn test_echo_of_applied_command_is_not_broadcast() {
        let content = content();
        let ctx = follower(&content);
        let mut engine = engine();
        let mut player = FakePlayer::ready(true, 10.0);
        let now = Instant::now();

        engine.on_inbound(&remote(true, 10.0), Some(&mut player), &ctx, now);
        assert_eq!(player.commands, vec![PlayerCommand::Play]);

        let out = engine.on_player_event(PlayerEventKind::Play, &player, &ctx, now + Duration::from_millis(20));
        assert!(out.is_empty());
    }

    #[test]
    fn test_user_seek_after_silent_remote_seek_is_broadcast() {
        let content = content();
        let ctx = follower(&content);
        let mut engine = engine();
        let mut player = FakePlayer::ready(true, 60.0);
        let now = Instant::now();

        // already at 60 s: a real player may not fire `seeked` for this one
        let seek = Envelope::new(MemberId::new("bob"), SyncMessage::Seek(60.0));
        engine.on_inbound(&seek, Some(&mut player), &ctx, now);

        player.position = 300.0;
        let out = engine.on_player_event(
            PlayerEventKind::Seeked,
            &player,
            &ctx,
            now + Duration::from_millis(100),
        );
        assert_eq!(out.messages, vec![SyncMessage::Seek(300.0)]);
    }

    #[test]
    fn test_local_play_broadcasts_notification_then_snapshot() {
        let content = content();
        let ctx = follower(&content);
        let mut engine = engine();
        let player = FakePlayer::ready(false, 12.0);

        let out = engine.on_player_event(PlayerEventKind::Play, &player, &ctx, Instant::now());
        assert_eq!(
            out.messages,
            vec![
                SyncMessage::Play,
                SyncMessage::Update(PlayState::new(content.clone(), 12.0, true)),
            ]
        );
    }

    #[test]
    fn test_stale_play_event_is_ignored() {
        let content = content();
        let mut engine = engine();
        // a "play" event arrives but the player is paused again
        let player = FakePlayer::ready(true, 12.0);
        let out = engine.on_player_event(PlayerEventKind::Play, &player, &follower(&content), Instant::now());
        assert!(out.is_empty());
    }

    #[test]
    fn test_snapshot_debounce_and_retry() {
        let content = content();
        let ctx = follower(&content);
        let mut engine = engine();
        let start = Instant::now();

        let playing = FakePlayer::ready(false, 1.0);
        let out = engine.on_player_event(PlayerEventKind::Play, &playing, &ctx, start);
        assert_eq!(out.messages.len(), 2);

        let paused = FakePlayer::ready(true, 1.3);
        let later = start + Duration::from_millis(300);
        let out = engine.on_player_event(PlayerEventKind::Pause, &paused, &ctx, later);
        assert_eq!(out.messages, vec![SyncMessage::Pause]);
        assert_eq!(out.retry_snapshot_at, Some(start + Duration::from_millis(1000)));

        let out = engine.request_snapshot(Some(&paused), &ctx, start + Duration::from_millis(1000));
        assert_eq!(
            out.messages,
            vec![SyncMessage::Update(PlayState::new(content.clone(), 1.3, false))]
        );
    }

    #[test]
    fn test_seeked_sends_position_only() {
        let content = content();
        let mut engine = engine();
        let player = FakePlayer::ready(false, 321.0);
        let out = engine.on_player_event(PlayerEventKind::Seeked, &player, &follower(&content), Instant::now());
        assert_eq!(out.messages, vec![SyncMessage::Seek(321.0)]);
        assert_eq!(engine.last_broadcast_at(), None);
    }

    #[test]
    fn test_heartbeat_only_while_playing() {
        let content = content();
        let ctx = follower(&content);
        let mut engine = engine();
        let start = Instant::now();

        let paused = FakePlayer::ready(true, 3.0);
        assert_eq!(engine.on_heartbeat(Some(&paused), &ctx, start), None);

        let playing = FakePlayer::ready(false, 3.0);
        assert!(engine.on_heartbeat(Some(&playing), &ctx, start).is_some());
        assert!(engine
            .on_heartbeat(Some(&playing), &ctx, start + Duration::from_millis(500))
            .is_none());
        assert!(engine
            .on_heartbeat(Some(&playing), &ctx, start + Duration::from_secs(5))
            .is_some());
    }

    #[test]
    fn test_nothing_happens_outside_a_room() {
        let content = content();
        let idle = SyncContext::new(RoomMembership::idle(), Some(&content));
        let mut engine = engine();
        let mut player = FakePlayer::ready(true, 0.0);

        assert!(engine
            .on_player_event(PlayerEventKind::Pause, &player, &idle, Instant::now())
            .is_empty());
        assert_eq!(
            engine.on_inbound(&remote(true, 99.0), Some(&mut player), &idle, Instant::now()),
            InboundOutcome::Ignored(IgnoreReason::NotInRoom)
        );
        assert!(player.commands.is_empty());
    }

    #[test]
    fn test_change_requests_navigation() {
        let content = content();
        let ctx = follower(&content);
        let mut engine = engine();
        let next = ContentInfo::new("604", "vidsrc", "https://cdn.example/604.m3u8");
        let change = SyncMessage::Change(PlayState::new(next.clone(), 0.0, false));

        let from_follower = Envelope::new(MemberId::new("bob"), change.clone());
        assert_eq!(
            engine.on_inbound(&from_follower, None, &ctx, Instant::now()),
            InboundOutcome::Ignored(IgnoreReason::NotFromLeader)
        );

        let from_leader = Envelope::new(MemberId::new("alice"), change).from_leader();
        assert_eq!(
            engine.on_inbound(&from_leader, None, &ctx, Instant::now()),
            InboundOutcome::Navigate(PlayState::new(next, 0.0, false))
        );

        let same = SyncMessage::Change(PlayState::new(content.clone(), 10.0, true));
        let envelope = Envelope::new(MemberId::new("alice"), same).from_leader();
        assert_eq!(
            engine.on_inbound(&envelope, None, &ctx, Instant::now()),
            InboundOutcome::Ignored(IgnoreReason::AlreadyCurrent)
        );
    }

    #[test]
    fn test_stale_snapshot_cannot_undo_newer_seek() {
        let content = content();
        let ctx = follower(&content);
        let mut engine = engine();
        let mut player = FakePlayer::ready(false, 0.0);
        let now = Instant::now();

        let earlier = remote(true, 0.0).stamped(5);
        assert_eq!(
            engine.on_inbound(&earlier, Some(&mut player), &ctx, now),
            InboundOutcome::Applied(vec![])
        );

        let seek = Envelope::new(MemberId::new("bob"), SyncMessage::Seek(900.0)).stamped(12);
        engine.on_inbound(&seek, Some(&mut player), &ctx, now);

        let old_snapshot = remote(true, 30.0).stamped(11);
        assert_eq!(
            engine.on_inbound(&old_snapshot, Some(&mut player), &ctx, now),
            InboundOutcome::Ignored(IgnoreReason::Stale)
        );
        assert_eq!(player.position, 900.0);

        // our next frame is ordered after everything we have seen
        assert_eq!(engine.next_stamp(), 13);
    }

    #[test]
    fn test_late_joiner_snapshot_is_applied_despite_low_stamp() {
        let content = content();
        let ctx = follower(&content);
        let mut engine = engine();
        let mut player = FakePlayer::ready(true, 0.0);
        let now = Instant::now();

        for stamp in 1..=20 {
            let seek = Envelope::new(MemberId::new("alice"), SyncMessage::Seek(10.0)).stamped(stamp);
            engine.on_inbound(&seek, Some(&mut player), &ctx, now);
        }

        // first frame ever received from this member
        let snapshot = remote(true, 50.0).stamped(2);
        assert_eq!(
            engine.on_inbound(&snapshot, Some(&mut player), &ctx, now),
            InboundOutcome::Applied(vec![PlayerCommand::Play, PlayerCommand::Seek(50.0)])
        );
        assert_eq!(player.position, 50.0);
    }
}
