use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::SyncError;

/// Identifier of a room member, as assigned by the room service.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        MemberId(id.into())
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Membership of the local process in a room.
///
/// Owned by the room service; this crate only ever reads it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoomMembership {
    pub in_room: bool,
    pub is_leader: bool,
}

impl RoomMembership {
    pub const fn idle() -> Self {
        Self {
            in_room: false,
            is_leader: false,
        }
    }

    pub const fn leader() -> Self {
        Self {
            in_room: true,
            is_leader: true,
        }
    }

    pub const fn follower() -> Self {
        Self {
            in_room: true,
            is_leader: false,
        }
    }

    pub fn role(&self) -> MemberRole {
        match (self.in_room, self.is_leader) {
            (false, _) => MemberRole::Idle,
            (true, true) => MemberRole::Leader,
            (true, false) => MemberRole::Follower,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberRole {
    Idle,
    Leader,
    Follower,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRole::Idle => f.write_str("idle"),
            MemberRole::Leader => f.write_str("leader"),
            MemberRole::Follower => f.write_str("follower"),
        }
    }
}

/// What is being watched: identity, display metadata and resolved media URL.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentInfo {
    pub video_id: String,
    pub video_name: String,
    #[serde(
        default,
        deserialize_with = "year_from_text_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub video_year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    pub source: String,
    pub url: String,
}

impl ContentInfo {
    pub fn new(video_id: impl Into<String>, source: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            source: source.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.video_name = name.into();
        self
    }

    pub fn with_episode(mut self, episode: u32) -> Self {
        self.episode = Some(episode);
        self
    }

    /// Absent or zero episode means the first one.
    pub fn effective_episode(&self) -> u32 {
        match self.episode {
            Some(n) if n > 0 => n,
            _ => 1,
        }
    }

    pub fn key(&self) -> ContentKey {
        ContentKey {
            video_id: self.video_id.clone(),
            episode: self.effective_episode(),
            source: self.source.clone(),
            url: self.url.clone(),
        }
    }
}

/// Peers send the year either as `"1999"` or as `1999`.
fn year_from_text_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Year {
        Text(String),
        Number(u64),
    }

    Ok(Option::<Year>::deserialize(deserializer)?.map(|year| match year {
        Year::Text(text) => text,
        Year::Number(n) => n.to_string(),
    }))
}

/// The fields whose change makes the leader announce new content.
/// Display metadata is deliberately not part of it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContentKey {
    pub video_id: String,
    pub episode: u32,
    pub source: String,
    pub url: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateKind {
    #[default]
    #[serde(rename = "play")]
    Play,
}

/// Complete playback snapshot exchanged on `play:update` and `play:change`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayState {
    #[serde(rename = "type", default)]
    pub kind: StateKind,
    pub current_time: f64,
    pub is_playing: bool,
    #[serde(flatten)]
    pub content: ContentInfo,
}

impl PlayState {
    pub fn new(content: ContentInfo, current_time: f64, is_playing: bool) -> Self {
        Self {
            kind: StateKind::Play,
            current_time: sanitize_position(current_time),
            is_playing,
            content,
        }
    }

    /// Rejects snapshots that cannot be applied to a player.
    pub fn validate(&self) -> Result<(), SyncError> {
        validate_position(self.current_time)
    }
}

pub fn validate_position(seconds: f64) -> Result<(), SyncError> {
    if seconds.is_finite() && seconds >= 0.0 {
        Ok(())
    } else {
        Err(SyncError::InvalidPosition(seconds))
    }
}

fn sanitize_position(seconds: f64) -> f64 {
    if seconds.is_finite() { seconds.max(0.0) } else { 0.0 }
}

/// Player lifecycle events the engine listens to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlayerEventKind {
    Play,
    Pause,
    Seeked,
}

impl PlayerEventKind {
    pub const ALL: [PlayerEventKind; 3] = [
        PlayerEventKind::Play,
        PlayerEventKind::Pause,
        PlayerEventKind::Seeked,
    ];
}

impl fmt::Display for PlayerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerEventKind::Play => f.write_str("play"),
            PlayerEventKind::Pause => f.write_str("pause"),
            PlayerEventKind::Seeked => f.write_str("seeked"),
        }
    }
}

/// A command the engine issued to the local player.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlayerCommand {
    Play,
    Pause,
    Seek(f64),
}

impl PlayerCommand {
    /// The player event this command is expected to produce.
    pub fn echo(&self) -> PlayerEventKind {
        match self {
            PlayerCommand::Play => PlayerEventKind::Play,
            PlayerCommand::Pause => PlayerEventKind::Pause,
            PlayerCommand::Seek(_) => PlayerEventKind::Seeked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content() -> ContentInfo {
        ContentInfo::new("tt0133093", "vidsrc", "https://cdn.example/matrix.m3u8")
            .with_name("The Matrix")
    }

    #[test]
    fn test_play_state_wire_names() {
        let mut content = content();
        content.video_year = Some("1999".to_string());
        let state = PlayState::new(content, 42.5, true);
        let json = serde_json::to_value(&state).unwrap();

        assert_eq!(json["type"], "play");
        assert_eq!(json["currentTime"], 42.5);
        assert_eq!(json["isPlaying"], true);
        assert_eq!(json["videoId"], "tt0133093");
        assert_eq!(json["videoName"], "The Matrix");
        assert_eq!(json["videoYear"], "1999");
        assert_eq!(json["source"], "vidsrc");
        assert!(json.get("episode").is_none());
        assert!(json.get("searchTitle").is_none());
    }

    #[test]
    fn test_play_state_decodes_without_optional_fields() {
        let json = r#"{"type":"play","url":"u","currentTime":3,"isPlaying":false,
                       "videoId":"v","videoName":"n","source":"s"}"#;
        let state: PlayState = serde_json::from_str(json).unwrap();
        assert_eq!(state.current_time, 3.0);
        assert_eq!(state.content.effective_episode(), 1);
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_video_year_accepts_text_and_number() {
        let text = r#"{"type":"play","url":"u","currentTime":0,"isPlaying":true,
                       "videoId":"v","videoName":"n","videoYear":"2023","source":"s"}"#;
        let number = r#"{"type":"play","url":"u","currentTime":0,"isPlaying":true,
                         "videoId":"v","videoName":"n","videoYear":2023,"source":"s"}"#;
        let null = r#"{"type":"play","url":"u","currentTime":0,"isPlaying":true,
                       "videoId":"v","videoName":"n","videoYear":null,"source":"s"}"#;

        let state: PlayState = serde_json::from_str(text).unwrap();
        assert_eq!(state.content.video_year.as_deref(), Some("2023"));
        let state: PlayState = serde_json::from_str(number).unwrap();
        assert_eq!(state.content.video_year.as_deref(), Some("2023"));
        let state: PlayState = serde_json::from_str(null).unwrap();
        assert!(state.content.video_year.is_none());
    }

    #[test]
    fn test_invalid_positions() {
        assert!(validate_position(-0.1).is_err());
        assert!(validate_position(f64::NAN).is_err());
        assert!(validate_position(f64::INFINITY).is_err());
        assert!(validate_position(0.0).is_ok());

        // locally built snapshots are clamped instead
        let state = PlayState::new(content(), -4.0, false);
        assert_eq!(state.current_time, 0.0);
    }

    #[test]
    fn test_content_key_ignores_display_metadata() {
        let a = content();
        let mut b = content().with_name("Matrix (1999)");
        b.search_title = Some("matrix".to_string());
        assert_eq!(a.key(), b.key());

        let c = content().with_episode(1);
        assert_eq!(a.key(), c.key());
        let d = content().with_episode(2);
        assert_ne!(a.key(), d.key());
    }

    #[test]
    fn test_membership_roles() {
        assert_eq!(RoomMembership::idle().role(), MemberRole::Idle);
        assert_eq!(RoomMembership::leader().role(), MemberRole::Leader);
        assert_eq!(RoomMembership::follower().role(), MemberRole::Follower);
        let stale = RoomMembership {
            in_room: false,
            is_leader: true,
        };
        assert_eq!(stale.role(), MemberRole::Idle);
    }
}
