use std::time::Duration;

use anyhow::Result;
use pmoconfig::Config;

/// Tunables of the synchronization engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Minimum spacing between two full snapshots.
    pub debounce: Duration,
    /// Snapshot period while playing.
    pub heartbeat: Duration,
    /// Position gap, in seconds, below which a snapshot does not seek.
    pub drift_tolerance_secs: f64,
    /// Quiet period before the leader announces a content change.
    pub change_debounce: Duration,
    /// How long a player event is considered the echo of an applied command.
    pub echo_window: Duration,
    /// Send a deferred snapshot when the debounce suppressed one.
    pub trailing_snapshot: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
            heartbeat: Duration::from_millis(5000),
            drift_tolerance_secs: 2.0,
            change_debounce: Duration::from_millis(500),
            echo_window: Duration::from_millis(400),
            trailing_snapshot: true,
        }
    }
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            debounce: Duration::from_millis(config.get_sync_debounce_ms()?),
            heartbeat: Duration::from_millis(config.get_sync_heartbeat_ms()?),
            drift_tolerance_secs: config.get_sync_drift_tolerance_secs()?,
            change_debounce: Duration::from_millis(config.get_sync_change_debounce_ms()?),
            echo_window: Duration::from_millis(config.get_sync_echo_window_ms()?),
            trailing_snapshot: config.get_sync_trailing_snapshot()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_embedded_config() {
        let config = Config::from_yaml_str("").unwrap();
        assert_eq!(
            SyncSettings::from_config(&config).unwrap(),
            SyncSettings::default()
        );
    }

    #[test]
    fn test_from_config_overrides() {
        let config =
            Config::from_yaml_str("sync:\n  heartbeat_ms: 2000\n  trailing_snapshot: false\n")
                .unwrap();
        let settings = SyncSettings::from_config(&config).unwrap();
        assert_eq!(settings.heartbeat, Duration::from_secs(2));
        assert!(!settings.trailing_snapshot);
        assert_eq!(settings.debounce, Duration::from_secs(1));
    }
}
