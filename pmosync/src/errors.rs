use thiserror::Error;

use crate::protocol::Topic;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No room connection available")]
    TransportUnavailable,
    #[error("Media player is not ready")]
    PlayerNotReady,
    #[error("Media player rejected play: {0}")]
    PlayRejected(String),
    #[error("Media player error: {0}")]
    Player(String),
    #[error("Unknown topic '{0}'")]
    UnknownTopic(String),
    #[error("Missing payload for topic {0}")]
    MissingPayload(Topic),
    #[error("Invalid payload for topic {0}: {1}")]
    InvalidPayload(Topic, String),
    #[error("Invalid playback position: {0}")]
    InvalidPosition(f64),
    #[error("JSON codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("Sync session is closed")]
    SessionClosed,
}

impl SyncError {
    pub fn play_rejected(reason: &str) -> Self {
        SyncError::PlayRejected(reason.to_string())
    }

    pub fn invalid_payload(topic: Topic, reason: &str) -> Self {
        SyncError::InvalidPayload(topic, reason.to_string())
    }

    /// True for the failures that simply defer convergence to the next event.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::TransportUnavailable | SyncError::PlayerNotReady | SyncError::PlayRejected(_)
        )
    }
}
