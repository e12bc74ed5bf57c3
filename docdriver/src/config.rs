//! Driver configuration.
//!
//! [`DriverConfig`] deserializes from the camelCase JSON shape a hosting server passes in:
//!
//! ```json
//! { "dataDirectory": "/var/lib/db/data", "syncWrites": false, "corruptAlertThreshold": 0.1 }
//! ```

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use docdriver_core::error::{DriverError, DriverResult};
use docdriver_file::{DEFAULT_CORRUPT_ALERT_THRESHOLD, FileStoreOpener, FileStoreOptions};


fn default_corrupt_alert_threshold() -> f64 {
    DEFAULT_CORRUPT_ALERT_THRESHOLD
}

/// Configuration for a [`Driver`](crate::Driver).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverConfig {
    /// Directory holding one file per collection. Created recursively when the driver is built.
    pub data_directory: PathBuf,
    /// Force every appended write down to disk.
    #[serde(default)]
    pub sync_writes: bool,
    /// Tolerated fraction of unreadable records when a collection file is opened.
    #[serde(default = "default_corrupt_alert_threshold")]
    pub corrupt_alert_threshold: f64,
}

impl DriverConfig {
    /// Creates a configuration with default options for the given data directory.
    pub fn new(data_directory: impl Into<PathBuf>) -> Self {
        Self {
            data_directory: data_directory.into(),
            sync_writes: false,
            corrupt_alert_threshold: DEFAULT_CORRUPT_ALERT_THRESHOLD,
        }
    }

    /// Parses a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> DriverResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| DriverError::Initialization(format!("invalid driver config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration from a JSON value.
    pub fn from_json(value: Value) -> DriverResult<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|err| DriverError::Initialization(format!("invalid driver config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn with_corrupt_alert_threshold(mut self, threshold: f64) -> Self {
        self.corrupt_alert_threshold = threshold;
        self
    }

    pub fn data_directory(&self) -> &Path {
        &self.data_directory
    }

    /// Checks the configuration for values the driver cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Initialization`] if the data directory is empty or the
    /// threshold lies outside `0.0..=1.0`.
    pub fn validate(&self) -> DriverResult<()> {
        if self.data_directory.as_os_str().is_empty() {
            return Err(DriverError::Initialization(
                "dataDirectory must not be empty".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.corrupt_alert_threshold) {
            return Err(DriverError::Initialization(format!(
                "corruptAlertThreshold must be between 0 and 1 but was {}",
                self.corrupt_alert_threshold
            )));
        }

        Ok(())
    }

    /// Builds the opener used for every collection file.
    pub fn store_opener(&self) -> FileStoreOpener {
        FileStoreOpener::new(FileStoreOptions {
            sync_writes: self.sync_writes,
            corrupt_alert_threshold: self.corrupt_alert_threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_applies_defaults() {
        let config = DriverConfig::from_json(json!({ "dataDirectory": "/tmp/data" })).unwrap();

        assert_eq!(config, DriverConfig::new("/tmp/data"));
        assert!(!config.sync_writes);
        assert_eq!(config.corrupt_alert_threshold, DEFAULT_CORRUPT_ALERT_THRESHOLD);
    }

    #[test]
    fn test_from_json_str_reads_every_key() {
        let config = DriverConfig::from_json_str(
            r#"{ "dataDirectory": "data", "syncWrites": true, "corruptAlertThreshold": 0.25 }"#,
        )
        .unwrap();

        assert_eq!(config.data_directory(), Path::new("data"));
        assert!(config.sync_writes);
        assert_eq!(config.store_opener().options().corrupt_alert_threshold, 0.25);
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        assert!(matches!(
            DriverConfig::from_json(json!({})),
            Err(DriverError::Initialization(_))
        ));
        assert!(matches!(
            DriverConfig::from_json(json!({ "dataDirectory": "data", "corruptAlertThreshold": 2.0 })),
            Err(DriverError::Initialization(_))
        ));
        assert!(DriverConfig::new("").validate().is_err());
    }
}
