//! Service configuration.
//!
//! Stored as JSON. Every field has a default, so a partial file (or none at
//! all) is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::ble::uuids::{READING_CHARACTERISTIC_UUID, SENSOR_SERVICE_UUID};
use crate::data::log_file::DEFAULT_LOG_FILE_NAME;
use crate::error::{Error, Result};

/// Whether persistence follows the recording flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingPolicy {
    /// Persist every reading; the recording flag is informational only.
    #[default]
    Always,
    /// Persist only while recording is started.
    WhileRecording,
}

/// Configuration for a [`crate::SensorService`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Service the sensor advertises.
    #[serde(default = "default_service_uuid")]
    pub service_uuid: Uuid,
    /// Characteristic that notifies readings.
    #[serde(default = "default_characteristic_uuid")]
    pub characteristic_uuid: Uuid,
    /// Where readings are appended.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    /// Add a `timeStamp` to each reading before persisting it.
    #[serde(default = "default_true")]
    pub timestamps: bool,
    #[serde(default)]
    pub recording_policy: RecordingPolicy,
    /// `fsync` the log after each append.
    #[serde(default = "default_true")]
    pub sync_writes: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            characteristic_uuid: default_characteristic_uuid(),
            log_path: default_log_path(),
            timestamps: default_true(),
            recording_policy: RecordingPolicy::default(),
            sync_writes: default_true(),
        }
    }
}

fn default_service_uuid() -> Uuid {
    SENSOR_SERVICE_UUID
}
fn default_characteristic_uuid() -> Uuid {
    READING_CHARACTERISTIC_UUID
}
fn default_true() -> bool {
    true
}

/// `sensorData.txt` in the user's documents directory, or in the working
/// directory when there is none.
pub fn default_log_path() -> PathBuf {
    dirs::document_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_LOG_FILE_NAME)
}

impl SensorConfig {
    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = serde_json::from_str(&contents).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load a configuration, falling back to defaults if the file is missing.
    ///
    /// A file that exists but cannot be parsed is still an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::metadata(path) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            _ => Self::load(path),
        }
    }

    /// Save the configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::storage(parent, e))?;
        }
        fs::write(path, json).map_err(|e| Error::storage(path, e))
    }

    /// Set the log path.
    pub fn with_log_path(mut self, log_path: impl Into<PathBuf>) -> Self {
        self.log_path = log_path.into();
        self
    }

    /// Enable or disable timestamp injection.
    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    /// Set the recording policy.
    pub fn with_recording_policy(mut self, policy: RecordingPolicy) -> Self {
        self.recording_policy = policy;
        self
    }

    /// Enable or disable `fsync` after each append.
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("sensor-config-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_defaults() {
        let config = SensorConfig::default();
        assert_eq!(config.service_uuid, SENSOR_SERVICE_UUID);
        assert_eq!(config.characteristic_uuid, READING_CHARACTERISTIC_UUID);
        assert!(config.log_path.ends_with(DEFAULT_LOG_FILE_NAME));
        assert!(config.timestamps);
        assert!(config.sync_writes);
        assert_eq!(config.recording_policy, RecordingPolicy::Always);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SensorConfig =
            serde_json::from_str(r#"{"timestamps":false,"recording_policy":"while_recording"}"#)
                .unwrap();
        assert!(!config.timestamps);
        assert_eq!(config.recording_policy, RecordingPolicy::WhileRecording);
        assert_eq!(config.service_uuid, SENSOR_SERVICE_UUID);
    }

    #[test]
    fn test_save_then_load() {
        let dir = scratch_dir();
        let path = dir.join("config.json");
        let config = SensorConfig::default()
            .with_log_path(dir.join("readings.txt"))
            .with_timestamps(false)
            .with_sync_writes(false);

        config.save(&path).unwrap();

        assert_eq!(SensorConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = SensorConfig::load_or_default(scratch_dir().join("none.json")).unwrap();
        assert_eq!(config, SensorConfig::default());
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = scratch_dir();
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            SensorConfig::load_or_default(&path),
            Err(Error::Config { .. })
        ));
    }
}
