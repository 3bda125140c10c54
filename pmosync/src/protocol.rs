//! Wire protocol of a watch room.
//!
//! Every message travels as a JSON [`WireFrame`]:
//!
//! ```text
//! {"event": "play:seek", "data": 754.2, "stamp": 18}
//! {"event": "play:update", "data": {"type": "play", "currentTime": 12.0, ...}, "stamp": 19}
//! {"event": "play:pause"}
//! ```
//!
//! `stamp` is a Lamport timestamp used to order frames coming from different
//! members (see [`crate::ordering`]). Frames without a stamp are accepted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SyncError;
use crate::model::{validate_position, MemberId, PlayState};

/// The five topics of the playback protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "play:update")]
    Update,
    #[serde(rename = "play:play")]
    Play,
    #[serde(rename = "play:pause")]
    Pause,
    #[serde(rename = "play:seek")]
    Seek,
    #[serde(rename = "play:change")]
    Change,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::Update,
        Topic::Play,
        Topic::Pause,
        Topic::Seek,
        Topic::Change,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Update => "play:update",
            Topic::Play => "play:play",
            Topic::Pause => "play:pause",
            Topic::Seek => "play:seek",
            Topic::Change => "play:change",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| SyncError::UnknownTopic(s.to_string()))
    }
}

/// A decoded protocol message.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncMessage {
    /// Full snapshot, sent on local transitions and by the heartbeat.
    Update(PlayState),
    Play,
    Pause,
    /// Explicit position directive, in seconds.
    Seek(f64),
    /// New content announced by the leader.
    Change(PlayState),
}

impl SyncMessage {
    pub fn topic(&self) -> Topic {
        match self {
            SyncMessage::Update(_) => Topic::Update,
            SyncMessage::Play => Topic::Play,
            SyncMessage::Pause => Topic::Pause,
            SyncMessage::Seek(_) => Topic::Seek,
            SyncMessage::Change(_) => Topic::Change,
        }
    }

    /// Discrete commands are idempotent directives; snapshots are not.
    pub fn is_discrete(&self) -> bool {
        matches!(
            self,
            SyncMessage::Play | SyncMessage::Pause | SyncMessage::Seek(_)
        )
    }

    pub fn to_frame(&self, stamp: Option<u64>) -> Result<WireFrame, SyncError> {
        let data = match self {
            SyncMessage::Update(state) | SyncMessage::Change(state) => serde_json::to_value(state)?,
            SyncMessage::Play | SyncMessage::Pause => Value::Null,
            SyncMessage::Seek(position) => serde_json::to_value(position)?,
        };
        Ok(WireFrame {
            event: self.topic(),
            data,
            stamp,
        })
    }

    pub fn from_frame(frame: WireFrame) -> Result<Self, SyncError> {
        let topic = frame.event;
        match topic {
            Topic::Play => Ok(SyncMessage::Play),
            Topic::Pause => Ok(SyncMessage::Pause),
            Topic::Seek => {
                let position = match frame.data {
                    Value::Null => return Err(SyncError::MissingPayload(topic)),
                    Value::Number(n) => n
                        .as_f64()
                        .ok_or_else(|| SyncError::invalid_payload(topic, "not a number"))?,
                    // some clients wrap the position in an object
                    Value::Object(map) => map
                        .get("currentTime")
                        .and_then(Value::as_f64)
                        .ok_or_else(|| SyncError::invalid_payload(topic, "missing currentTime"))?,
                    other => {
                        return Err(SyncError::invalid_payload(topic, &other.to_string()));
                    }
                };
                validate_position(position)?;
                Ok(SyncMessage::Seek(position))
            }
            Topic::Update | Topic::Change => {
                if frame.data.is_null() {
                    return Err(SyncError::MissingPayload(topic));
                }
                let state: PlayState = serde_json::from_value(frame.data)?;
                state.validate()?;
                if topic == Topic::Update {
                    Ok(SyncMessage::Update(state))
                } else {
                    Ok(SyncMessage::Change(state))
                }
            }
        }
    }

    pub fn encode(&self, stamp: Option<u64>) -> Result<String, SyncError> {
        Ok(serde_json::to_string(&self.to_frame(stamp)?)?)
    }
}

/// JSON frame as carried by the room transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    pub event: Topic,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stamp: Option<u64>,
}

impl WireFrame {
    pub fn decode(text: &str) -> Result<(SyncMessage, Option<u64>), SyncError> {
        let frame: WireFrame = serde_json::from_str(text)?;
        let stamp = frame.stamp;
        Ok((SyncMessage::from_frame(frame)?, stamp))
    }
}

/// A message as delivered to a member, with what the room service knows
/// about its sender.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub from: MemberId,
    /// Whether the sender held leadership when the room relayed the frame.
    pub from_leader: bool,
    pub stamp: Option<u64>,
    pub message: SyncMessage,
}

impl Envelope {
    pub fn new(from: MemberId, message: SyncMessage) -> Self {
        Self {
            from,
            from_leader: false,
            stamp: None,
            message,
        }
    }

    pub fn from_leader(mut self) -> Self {
        self.from_leader = true;
        self
    }

    pub fn stamped(mut self, stamp: u64) -> Self {
        self.stamp = Some(stamp);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentInfo;

    fn state() -> PlayState {
        PlayState::new(
            ContentInfo::new("1396", "vidlink", "https://cdn.example/bb/s1e1.m3u8")
                .with_name("Breaking Bad")
                .with_episode(3),
            812.25,
            true,
        )
    }

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::Update.to_string(), "play:update");
        assert_eq!("play:seek".parse::<Topic>().unwrap(), Topic::Seek);
        assert!(matches!(
            "play:stop".parse::<Topic>(),
            Err(SyncError::UnknownTopic(_))
        ));
    }

    #[test]
    fn test_discrete_frames_have_minimal_payload() {
        let play = SyncMessage::Play.encode(None).unwrap();
        assert_eq!(play, r#"{"event":"play:play"}"#);

        let seek = SyncMessage::Seek(754.5).encode(Some(7)).unwrap();
        assert_eq!(seek, r#"{"event":"play:seek","data":754.5,"stamp":7}"#);
    }

    #[test]
    fn test_snapshot_frame_decodes_back() {
        let text = SyncMessage::Change(state()).encode(Some(3)).unwrap();
        let (message, stamp) = WireFrame::decode(&text).unwrap();
        assert_eq!(stamp, Some(3));
        assert_eq!(message, SyncMessage::Change(state()));
    }

    #[test]
    fn test_seek_accepts_wrapped_position() {
        let (message, _) =
            WireFrame::decode(r#"{"event":"play:seek","data":{"currentTime":12}}"#).unwrap();
        assert_eq!(message, SyncMessage::Seek(12.0));
    }

    #[test]
    fn test_rejects_bad_payloads() {
        assert!(matches!(
            WireFrame::decode(r#"{"event":"play:seek"}"#),
            Err(SyncError::MissingPayload(Topic::Seek))
        ));
        assert!(matches!(
            WireFrame::decode(r#"{"event":"play:seek","data":-2}"#),
            Err(SyncError::InvalidPosition(_))
        ));
        assert!(matches!(
            WireFrame::decode(r#"{"event":"play:update"}"#),
            Err(SyncError::MissingPayload(Topic::Update))
        ));
        assert!(matches!(
            WireFrame::decode(r#"{"event":"play:rewind"}"#),
            Err(SyncError::Codec(_))
        ));
        assert!(matches!(
            WireFrame::decode(
                r#"{"event":"play:update","data":{"type":"play","url":"u","currentTime":-1,
                    "isPlaying":true,"videoId":"v","videoName":"n","source":"s"}}"#
            ),
            Err(SyncError::InvalidPosition(_))
        ));
    }

    #[test]
    fn test_discrete_classification() {
        assert!(SyncMessage::Play.is_discrete());
        assert!(SyncMessage::Seek(1.0).is_discrete());
        assert!(!SyncMessage::Update(state()).is_discrete());
        assert!(!SyncMessage::Change(state()).is_discrete());
    }
}
