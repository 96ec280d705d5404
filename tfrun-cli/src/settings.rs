//! Policy settings file
//!
//! A JSON document with retry and lock policy defaults. Durations are whole
//! seconds. Every field is optional; command-line flags take precedence.
//!
//! ```json
//! {
//!   "retries": 3,
//!   "retry_interval": 10,
//!   "init_retries": 2,
//!   "init_retry_interval": 5,
//!   "lock_expiration": 1800,
//!   "graceful_shutdown_period": 60
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use tfrun_core::{ActionOptions, InitOptions, OutputOptions, RetryPolicy};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub retries: Option<i64>,
    pub retry_interval: Option<u64>,
    pub init_retries: Option<i64>,
    pub init_retry_interval: Option<u64>,
    pub lock_expiration: Option<u64>,
    pub graceful_shutdown_period: Option<u64>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        serde_json::from_str(&content)
            .map_err(|e| format!("Invalid settings file {}: {}", path.display(), e))
    }

    /// Fill every field still unset from `defaults`
    pub fn or(self, defaults: Settings) -> Settings {
        Settings {
            retries: self.retries.or(defaults.retries),
            retry_interval: self.retry_interval.or(defaults.retry_interval),
            init_retries: self.init_retries.or(defaults.init_retries),
            init_retry_interval: self.init_retry_interval.or(defaults.init_retry_interval),
            lock_expiration: self.lock_expiration.or(defaults.lock_expiration),
            graceful_shutdown_period: self
                .graceful_shutdown_period
                .or(defaults.graceful_shutdown_period),
        }
    }

    fn retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries.unwrap_or(0), seconds(self.retry_interval))
    }

    fn init(&self) -> InitOptions {
        InitOptions {
            retry: RetryPolicy::new(
                self.init_retries.unwrap_or(0),
                seconds(self.init_retry_interval),
            ),
        }
    }

    pub fn action_options(&self) -> ActionOptions {
        ActionOptions {
            retry: self.retry(),
            graceful_shutdown_period: seconds(self.graceful_shutdown_period),
            lock_expiration: seconds(self.lock_expiration),
            init: self.init(),
        }
    }

    pub fn output_options(&self) -> OutputOptions {
        OutputOptions {
            retry: self.retry(),
            init: self.init(),
        }
    }
}

fn seconds(value: Option<u64>) -> Duration {
    Duration::from_secs(value.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_partial_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tfrun.json");
        std::fs::write(&path, r#"{"retries": 3, "lock_expiration": 1800}"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.retries, Some(3));
        assert_eq!(settings.lock_expiration, Some(1800));
        assert_eq!(settings.retry_interval, None);
    }

    #[test]
    fn test_load_rejects_unknown_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tfrun.json");
        std::fs::write(&path, r#"{"retry": 3}"#).unwrap();

        let err = Settings::load(&path).unwrap_err();
        assert!(err.contains("Invalid settings file"));
    }

    #[test]
    fn test_flags_override_file() {
        let flags = Settings {
            retries: Some(5),
            ..Default::default()
        };
        let file = Settings {
            retries: Some(1),
            retry_interval: Some(10),
            ..Default::default()
        };

        let merged = flags.or(file);
        assert_eq!(merged.retries, Some(5));
        assert_eq!(merged.retry_interval, Some(10));
    }

    #[test]
    fn test_action_options() {
        let settings = Settings {
            retries: Some(2),
            retry_interval: Some(10),
            init_retries: Some(-1),
            lock_expiration: Some(1800),
            graceful_shutdown_period: Some(60),
            ..Default::default()
        };

        let options = settings.action_options();
        assert_eq!(options.retry.total_attempts(), 3);
        assert_eq!(options.retry.interval, Duration::from_secs(10));
        assert_eq!(options.init.retry.total_attempts(), 1);
        assert_eq!(options.lock_expiration, Duration::from_secs(1800));
        assert_eq!(options.graceful_shutdown_period, Duration::from_secs(60));
    }

    #[test]
    fn test_empty_settings_run_once() {
        let options = Settings::default().output_options();
        assert_eq!(options.retry.total_attempts(), 1);
        assert_eq!(options.init.retry.total_attempts(), 1);
    }
}
