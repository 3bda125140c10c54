//! # PMOSync Configuration Module
//!
//! This module provides configuration management for the PMOSync family, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! // Get the global configuration
//! let config = get_config();
//!
//! // Access configuration values
//! let heartbeat = config.get_sync_heartbeat_ms()?;
//!
//! // Update configuration values
//! config.set_sync_heartbeat_ms(3000)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde_yaml::{Mapping, Number, Value};
use std::{env, fs, path::Path, sync::Arc};
use tracing::info;
use uuid::Uuid;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmosync.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load PMOSync configuration"));
}

const ENV_CONFIG_DIR: &str = "PMOSYNC_CONFIG";
const ENV_PREFIX: &str = "PMOSYNC_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmosync";

// Default values for configuration
const DEFAULT_SYNC_DEBOUNCE_MS: u64 = 1000;
const DEFAULT_SYNC_HEARTBEAT_MS: u64 = 5000;
const DEFAULT_SYNC_DRIFT_TOLERANCE_SECS: f64 = 2.0;
const DEFAULT_SYNC_CHANGE_DEBOUNCE_MS: u64 = 500;
const DEFAULT_SYNC_ECHO_WINDOW_MS: u64 = 400;
const DEFAULT_SYNC_TRAILING_SNAPSHOT: bool = true;
const DEFAULT_LOG_BUFFER_CAPACITY: usize = 1000;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_u64().map(|v| v as usize).unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, size: usize) -> Result<()> {
            let n = Number::from(size);
            self.set_value($path, Value::Number(n))
        }
    };
}

/// Macro to generate getter/setter for millisecond durations with default
macro_rules! impl_millis_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<u64> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => match n.as_u64() {
                    Some(ms) if ms > 0 => Ok(ms),
                    _ => {
                        tracing::warn!(path = %$path.join("."), "Invalid duration, using default {}", $default);
                        Ok($default)
                    }
                },
                Ok(Value::String(s)) => match s.trim().parse::<u64>() {
                    Ok(ms) if ms > 0 => Ok(ms),
                    _ => {
                        tracing::warn!(path = %$path.join("."), value = %s, "Invalid duration, using default {}", $default);
                        Ok($default)
                    }
                },
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, ms: u64) -> Result<()> {
            if ms == 0 {
                return Err(anyhow!("{} must be greater than 0", $path.join(".")));
            }
            self.set_value($path, Value::Number(Number::from(ms)))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Configuration manager for PMOSync
///
/// This structure manages the application configuration, including:
/// - Loading configuration from YAML files
/// - Merging with default configuration
/// - Handling environment variable overrides
/// - Providing typed getters/setters for configuration values
///
/// A configuration built with [`Config::from_yaml_str`] has no backing file
/// and never touches the disk.
#[derive(Debug)]
pub struct Config {
    config_dir: Option<String>,
    path: Option<String>,
    data: Mutex<Value>,
}

// Implémentation manuelle de Clone
impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data.lock().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        // Default fallback
        CONFIG_DIR_NAME.to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PMOSYNC_CONFIG` environment variable
    /// 3. `.pmosync` in the current directory
    /// 4. `.pmosync` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for read/write permissions.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "Loaded config file");
            data
        } else {
            info!(config_file = %path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        let external_value: Value = serde_yaml::from_slice(&yaml_data)?;
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir: Some(config_dir),
            path: Some(path),
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Builds an in-memory configuration from a YAML document merged over the
    /// embedded defaults. Environment overrides are not applied.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        if !yaml.trim().is_empty() {
            let external_value: Value = serde_yaml::from_str(yaml)?;
            merge_yaml(&mut default_value, &external_value);
        }

        Ok(Config {
            config_dir: None,
            path: None,
            data: Mutex::new(Self::lower_keys_value(default_value)),
        })
    }

    /// Returns the directory holding `config.yaml`, if the configuration is file-backed.
    pub fn directory(&self) -> Option<&str> {
        self.config_dir.as_deref()
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let yaml = {
            let data = self.data.lock();
            serde_yaml::to_string(&*data)?
        };
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["sync", "heartbeat_ms"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data.lock();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(err) = Self::set_value_internal(config, &key_path, yaml_value) {
                    tracing::warn!(env_var = %key, "Ignoring config override: {}", err);
                }
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let new_key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(new_key, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Returns the identifier of the local room member, generating and
    /// persisting a UUID the first time it is requested.
    pub fn get_member_id(&self) -> Result<String> {
        let path = &["member", "id"];
        match self.get_value(path) {
            Ok(Value::String(id)) if !id.trim().is_empty() => Ok(id.trim().to_string()),
            _ => {
                let new_id = Uuid::new_v4().to_string();
                self.set_value(path, Value::String(new_id.clone()))?;
                Ok(new_id)
            }
        }
    }

    /// Sets the identifier of the local room member
    pub fn set_member_id(&self, id: String) -> Result<()> {
        let id = id.trim();
        if id.is_empty() {
            return Err(anyhow!("Member id cannot be empty"));
        }
        self.set_value(&["member", "id"], Value::String(id.to_string()))
    }

    impl_millis_config!(
        get_sync_debounce_ms,
        set_sync_debounce_ms,
        &["sync", "debounce_ms"],
        DEFAULT_SYNC_DEBOUNCE_MS
    );

    impl_millis_config!(
        get_sync_heartbeat_ms,
        set_sync_heartbeat_ms,
        &["sync", "heartbeat_ms"],
        DEFAULT_SYNC_HEARTBEAT_MS
    );

    impl_millis_config!(
        get_sync_change_debounce_ms,
        set_sync_change_debounce_ms,
        &["sync", "change_debounce_ms"],
        DEFAULT_SYNC_CHANGE_DEBOUNCE_MS
    );

    impl_millis_config!(
        get_sync_echo_window_ms,
        set_sync_echo_window_ms,
        &["sync", "echo_window_ms"],
        DEFAULT_SYNC_ECHO_WINDOW_MS
    );

    impl_bool_config!(
        get_sync_trailing_snapshot,
        set_sync_trailing_snapshot,
        &["sync", "trailing_snapshot"],
        DEFAULT_SYNC_TRAILING_SNAPSHOT
    );

    /// Gets the position drift, in seconds, tolerated before a snapshot triggers a seek
    pub fn get_sync_drift_tolerance_secs(&self) -> Result<f64> {
        match self.get_value(&["sync", "drift_tolerance_secs"]) {
            Ok(Value::Number(n)) => match n.as_f64() {
                Some(v) if v.is_finite() && v >= 0.0 => Ok(v),
                _ => {
                    tracing::warn!(
                        "Invalid drift tolerance, using default {}",
                        DEFAULT_SYNC_DRIFT_TOLERANCE_SECS
                    );
                    Ok(DEFAULT_SYNC_DRIFT_TOLERANCE_SECS)
                }
            },
            _ => Ok(DEFAULT_SYNC_DRIFT_TOLERANCE_SECS),
        }
    }

    /// Sets the position drift tolerance in seconds
    pub fn set_sync_drift_tolerance_secs(&self, secs: f64) -> Result<()> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(anyhow!("Drift tolerance must be a non-negative number"));
        }
        self.set_value(
            &["sync", "drift_tolerance_secs"],
            Value::Number(Number::from(secs)),
        )
    }

    impl_usize_config!(
        get_log_cache_size,
        set_log_cache_size,
        &["host", "logger", "buffer_capacity"],
        DEFAULT_LOG_BUFFER_CAPACITY
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    /// Récupère le niveau de log minimum depuis la configuration
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(&["host", "logger", "min_level"]) {
            Ok(Value::String(s)) => Ok(s),
            _ => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }

    /// Définit le niveau de log minimum dans la configuration
    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }
}

/// Returns the global configuration instance
///
/// This function provides access to the singleton configuration instance,
/// which is lazily loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings, keys from `external` are merged recursively into `default`
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        // pour les scalaires ou séquences, on remplace
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults() {
        let config = Config::from_yaml_str("").unwrap();
        assert_eq!(config.get_sync_debounce_ms().unwrap(), 1000);
        assert_eq!(config.get_sync_heartbeat_ms().unwrap(), 5000);
        assert_eq!(config.get_sync_change_debounce_ms().unwrap(), 500);
        assert_eq!(config.get_sync_echo_window_ms().unwrap(), 400);
        assert!(config.get_sync_trailing_snapshot().unwrap());
        assert_eq!(config.get_sync_drift_tolerance_secs().unwrap(), 2.0);
        assert_eq!(config.get_log_cache_size().unwrap(), 1000);
        assert_eq!(config.get_log_min_level().unwrap(), "INFO");
        assert!(config.get_log_enable_console().unwrap());
    }

    #[test]
    fn test_external_yaml_overrides_defaults() {
        let config = Config::from_yaml_str(
            "Sync:\n  Heartbeat_MS: 2500\n  drift_tolerance_secs: 0.5\n",
        )
        .unwrap();
        assert_eq!(config.get_sync_heartbeat_ms().unwrap(), 2500);
        assert_eq!(config.get_sync_drift_tolerance_secs().unwrap(), 0.5);
        // untouched keys keep their default
        assert_eq!(config.get_sync_debounce_ms().unwrap(), 1000);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = Config::from_yaml_str(
            "sync:\n  debounce_ms: 0\n  heartbeat_ms: soon\n  drift_tolerance_secs: -3\n",
        )
        .unwrap();
        assert_eq!(config.get_sync_debounce_ms().unwrap(), 1000);
        assert_eq!(config.get_sync_heartbeat_ms().unwrap(), 5000);
        assert_eq!(config.get_sync_drift_tolerance_secs().unwrap(), 2.0);
    }

    #[test]
    fn test_setters_validate() {
        let config = Config::from_yaml_str("").unwrap();
        assert!(config.set_sync_debounce_ms(0).is_err());
        assert!(config.set_sync_drift_tolerance_secs(f64::NAN).is_err());
        config.set_sync_debounce_ms(750).unwrap();
        assert_eq!(config.get_sync_debounce_ms().unwrap(), 750);
    }

    #[test]
    fn test_member_id_is_generated_once() {
        let config = Config::from_yaml_str("").unwrap();
        let first = config.get_member_id().unwrap();
        let second = config.get_member_id().unwrap();
        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
        assert!(config.set_member_id("  ".to_string()).is_err());
    }

    #[test]
    fn test_load_config_persists_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_string_lossy().to_string();
        fs::write(
            dir.path().join("config.yaml"),
            "sync:\n  change_debounce_ms: 250\n",
        )
        .unwrap();

        let config = Config::load_config(&dir_path).unwrap();
        assert_eq!(config.get_sync_change_debounce_ms().unwrap(), 250);
        config.set_log_min_level("DEBUG".to_string()).unwrap();

        let reloaded = Config::load_config(&dir_path).unwrap();
        assert_eq!(reloaded.get_log_min_level().unwrap(), "DEBUG");
        assert_eq!(reloaded.get_sync_change_debounce_ms().unwrap(), 250);
    }

    #[test]
    fn test_merge_yaml_replaces_scalars() {
        let mut default: Value = serde_yaml::from_str("a: 1\nb:\n  c: 2\n  d: 3\n").unwrap();
        let external: Value = serde_yaml::from_str("b:\n  c: 5\ne: 6\n").unwrap();
        merge_yaml(&mut default, &external);
        let config = Config {
            config_dir: None,
            path: None,
            data: Mutex::new(default),
        };
        assert_eq!(config.get_value(&["b", "c"]).unwrap(), Value::from(5));
        assert_eq!(config.get_value(&["b", "d"]).unwrap(), Value::from(3));
        assert_eq!(config.get_value(&["e"]).unwrap(), Value::from(6));
        assert!(config.get_value(&["missing"]).is_err());
    }
}
