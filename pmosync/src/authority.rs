//! Authority Gate
//!
//! Playback control is symmetric: every member of a room may originate
//! play, pause, seek and snapshot broadcasts. Content selection is not: only
//! the leader announces what the room watches (`play:change`), and only in
//! reaction to an actual change of video, episode, source or URL.
//!
//! Leadership itself is assigned by the room service; the gate only reads it.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::debounce::DelayedTrigger;
use crate::model::{ContentInfo, ContentKey, RoomMembership};
use crate::protocol::{Envelope, SyncMessage};

pub struct AuthorityGate;

impl AuthorityGate {
    pub fn may_broadcast_playback(membership: &RoomMembership) -> bool {
        membership.in_room
    }

    pub fn may_broadcast_change(membership: &RoomMembership) -> bool {
        membership.in_room && membership.is_leader
    }

    /// Inbound content changes are only honoured from the leader.
    pub fn accepts(envelope: &Envelope) -> bool {
        match envelope.message {
            SyncMessage::Change(_) => envelope.from_leader,
            _ => true,
        }
    }

    /// UI convention: followers should not pick content or source.
    pub fn should_disable_controls(membership: &RoomMembership) -> bool {
        membership.in_room && !membership.is_leader
    }
}

/// Outcome of observing the locally bound content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDecision {
    /// Same video, episode, source and URL as before.
    Unchanged,
    /// Changed, but this member may not announce it.
    NotAuthorized,
    /// An announcement is scheduled; `superseded` tells whether it replaced a
    /// pending one.
    Scheduled { superseded: bool },
}

/// Watches the local content binding and schedules the leader's
/// `play:change` announcement.
#[derive(Debug)]
pub struct ContentChangeWatcher {
    last_key: Option<ContentKey>,
    trigger: DelayedTrigger<ContentInfo>,
}

impl ContentChangeWatcher {
    pub fn new(delay: Duration) -> Self {
        Self {
            last_key: None,
            trigger: DelayedTrigger::new(delay),
        }
    }

    pub fn observe(
        &mut self,
        content: &ContentInfo,
        membership: &RoomMembership,
        now: Instant,
    ) -> ChangeDecision {
        let key = content.key();
        if self.last_key.as_ref() == Some(&key) {
            if self.trigger.is_armed() {
                // metadata refresh of the pending content
                self.trigger.arm(content.clone(), now);
            }
            return ChangeDecision::Unchanged;
        }
        self.schedule(content, membership, now)
    }

    /// Schedules the bound content whatever the last observed key: used
    /// when leadership is acquired with content already bound.
    pub fn announce(
        &mut self,
        content: &ContentInfo,
        membership: &RoomMembership,
        now: Instant,
    ) -> ChangeDecision {
        self.schedule(content, membership, now)
    }

    fn schedule(
        &mut self,
        content: &ContentInfo,
        membership: &RoomMembership,
        now: Instant,
    ) -> ChangeDecision {
        self.last_key = Some(content.key());

        if !AuthorityGate::may_broadcast_change(membership) {
            debug!(video_id = %content.video_id, "Content changed locally, not leader: no announcement");
            self.trigger.cancel();
            return ChangeDecision::NotAuthorized;
        }

        let superseded = self.trigger.arm(content.clone(), now);
        debug!(
            video_id = %content.video_id,
            episode = content.effective_episode(),
            source = %content.source,
            superseded,
            "Content change announcement scheduled"
        );
        ChangeDecision::Scheduled { superseded }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.trigger.deadline()
    }

    /// Returns the content to announce once the quiet period is over.
    /// Leadership is checked again at that moment.
    pub fn fire(&mut self, membership: &RoomMembership, now: Instant) -> Option<ContentInfo> {
        let content = self.trigger.fire(now)?;
        if AuthorityGate::may_broadcast_change(membership) {
            Some(content)
        } else {
            debug!(video_id = %content.video_id, "Leadership lost before announcement, dropped");
            None
        }
    }

    pub fn cancel(&mut self) {
        self.trigger.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemberId, PlayState};

    const DELAY: Duration = Duration::from_millis(500);

    fn episode(n: u32) -> ContentInfo {
        ContentInfo::new("1399", "vidsrc", format!("https://cdn.example/got/{n}.m3u8"))
            .with_name("Game of Thrones")
            .with_episode(n)
    }

    #[test]
    fn test_playback_is_symmetric() {
        assert!(AuthorityGate::may_broadcast_playback(&RoomMembership::leader()));
        assert!(AuthorityGate::may_broadcast_playback(&RoomMembership::follower()));
        assert!(!AuthorityGate::may_broadcast_playback(&RoomMembership::idle()));
    }

    #[test]
    fn test_only_leader_announces() {
        assert!(AuthorityGate::may_broadcast_change(&RoomMembership::leader()));
        assert!(!AuthorityGate::may_broadcast_change(&RoomMembership::follower()));
        assert!(!AuthorityGate::may_broadcast_change(&RoomMembership::idle()));
    }

    #[test]
    fn test_controls_flag() {
        assert!(AuthorityGate::should_disable_controls(&RoomMembership::follower()));
        assert!(!AuthorityGate::should_disable_controls(&RoomMembership::leader()));
        assert!(!AuthorityGate::should_disable_controls(&RoomMembership::idle()));
    }

    #[test]
    fn test_inbound_change_requires_leader() {
        let change = SyncMessage::Change(PlayState::new(episode(1), 0.0, false));
        let from_follower = Envelope::new(MemberId::new("bob"), change.clone());
        assert!(!AuthorityGate::accepts(&from_follower));
        assert!(AuthorityGate::accepts(&from_follower.clone().from_leader()));
        assert!(AuthorityGate::accepts(&Envelope::new(
            MemberId::new("bob"),
            SyncMessage::Seek(4.0)
        )));
    }

    #[test]
    fn test_follower_change_never_schedules() {
        let mut watcher = ContentChangeWatcher::new(DELAY);
        let now = Instant::now();
        assert_eq!(
            watcher.observe(&episode(1), &RoomMembership::follower(), now),
            ChangeDecision::NotAuthorized
        );
        assert_eq!(watcher.deadline(), None);
        assert_eq!(watcher.fire(&RoomMembership::follower(), now + DELAY), None);
    }

    #[test]
    fn test_rapid_changes_collapse() {
        let mut watcher = ContentChangeWatcher::new(DELAY);
        let leader = RoomMembership::leader();
        let start = Instant::now();

        assert_eq!(
            watcher.observe(&episode(1), &leader, start),
            ChangeDecision::Scheduled { superseded: false }
        );
        let later = start + Duration::from_millis(100);
        assert_eq!(
            watcher.observe(&episode(2), &leader, later),
            ChangeDecision::Scheduled { superseded: true }
        );

        assert_eq!(watcher.fire(&leader, start + DELAY), None);
        assert_eq!(watcher.fire(&leader, later + DELAY), Some(episode(2)));
        assert_eq!(watcher.fire(&leader, later + DELAY * 4), None);
    }

    #[test]
    fn test_unchanged_content_is_ignored() {
        let mut watcher = ContentChangeWatcher::new(DELAY);
        let leader = RoomMembership::leader();
        let now = Instant::now();
        watcher.observe(&episode(1), &leader, now);
        watcher.fire(&leader, now + DELAY);

        let renamed = episode(1).with_name("GoT");
        assert_eq!(
            watcher.observe(&renamed, &leader, now + DELAY),
            ChangeDecision::Unchanged
        );
        assert_eq!(watcher.deadline(), None);
    }

    #[test]
    fn test_promotion_announces_bound_content() {
        let mut watcher = ContentChangeWatcher::new(DELAY);
        let now = Instant::now();
        assert_eq!(
            watcher.observe(&episode(4), &RoomMembership::follower(), now),
            ChangeDecision::NotAuthorized
        );
        assert_eq!(
            watcher.announce(&episode(4), &RoomMembership::leader(), now),
            ChangeDecision::Scheduled { superseded: false }
        );
        assert_eq!(watcher.fire(&RoomMembership::leader(), now + DELAY), Some(episode(4)));
    }

    #[test]
    fn test_leadership_rechecked_at_fire_time() {
        let mut watcher = ContentChangeWatcher::new(DELAY);
        let now = Instant::now();
        watcher.observe(&episode(3), &RoomMembership::leader(), now);
        assert_eq!(watcher.fire(&RoomMembership::follower(), now + DELAY), None);
    }
}
