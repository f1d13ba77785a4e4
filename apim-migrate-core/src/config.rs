use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::artifact::MAX_APIS_TO_EXPORT_ONCE;
use crate::retry::{RetryPolicy, DEFAULT_BACKOFF, DEFAULT_MAX_ATTEMPTS};
use crate::upload::{
    UploadSettings, DEFAULT_QUEUE_CAPACITY, DEFAULT_UPLOAD_BATCH_SIZE, DEFAULT_UPLOAD_WORKERS,
};

fn default_export_dir() -> PathBuf {
    PathBuf::from("migration-exports")
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment '{0}' is not defined in the configuration")]
    UnknownEnvironment(String),
    #[error("environment '{environment}' has no '{endpoint}' endpoint configured")]
    MissingEndpoint {
        environment: String,
        endpoint: &'static str,
    },
}

/// Endpoints of one management-service environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Publisher REST API base, e.g. `https://host:9443/api/am/publisher/v4`.
    pub publisher: String,
    /// Admin REST API base, used for application listing and export.
    #[serde(default)]
    pub admin: Option<String>,
    /// Indexing service base URL.
    #[serde(default)]
    pub ai_service: Option<String>,
}

/// Upload pipeline knobs; zero values fall back to the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default)]
    pub workers: usize,
    #[serde(default)]
    pub page_size: usize,
    #[serde(default)]
    pub batch_size: usize,
    #[serde(default)]
    pub queue_capacity: usize,
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff_millis: Option<u64>,
}

impl UploadConfig {
    pub fn to_settings(&self, tenant: impl Into<String>) -> UploadSettings {
        let or_default = |value: usize, default: usize| if value == 0 { default } else { value };
        let max_attempts = if self.max_attempts == 0 {
            DEFAULT_MAX_ATTEMPTS
        } else {
            self.max_attempts
        };
        let backoff = self
            .backoff_millis
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BACKOFF);
        UploadSettings {
            workers: or_default(self.workers, DEFAULT_UPLOAD_WORKERS),
            page_size: or_default(self.page_size, MAX_APIS_TO_EXPORT_ONCE),
            batch_size: or_default(self.batch_size, DEFAULT_UPLOAD_BATCH_SIZE),
            queue_capacity: or_default(self.queue_capacity, DEFAULT_QUEUE_CAPACITY),
            tenant: tenant.into(),
            retry: RetryPolicy::new(max_attempts, backoff),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root under which `<environment>/<tenant-dir>/` run directories are created.
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
    /// Per-request timeout applied by the HTTP clients.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            export_dir: default_export_dir(),
            request_timeout_secs: default_request_timeout_secs(),
            upload: UploadConfig::default(),
            environments: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn trace_loaded(&self) {
        info!(
            export_dir = %self.export_dir.display(),
            environments_count = self.environments.len(),
            request_timeout_secs = self.request_timeout_secs,
            "Loaded Config"
        );
        debug!(?self, "Config loaded (full debug)");
    }

    pub fn environment(&self, name: &str) -> Result<&EnvironmentConfig, ConfigError> {
        self.environments
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEnvironment(name.to_string()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_upload_values_fall_back_to_defaults() {
        let settings = UploadConfig::default().to_settings("carbon.super");
        assert_eq!(settings.workers, DEFAULT_UPLOAD_WORKERS);
        assert_eq!(settings.batch_size, DEFAULT_UPLOAD_BATCH_SIZE);
        assert_eq!(settings.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(settings.retry.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(settings.tenant, "carbon.super");
    }

    #[test]
    fn explicit_upload_values_win() {
        let settings = UploadConfig {
            workers: 8,
            page_size: 50,
            batch_size: 10,
            queue_capacity: 4,
            max_attempts: 3,
            backoff_millis: Some(0),
        }
        .to_settings("t");
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.page_size, 50);
        assert_eq!(settings.batch_size, 10);
        assert_eq!(settings.queue_capacity, 4);
        assert_eq!(settings.retry.max_attempts, 3);
        assert!(settings.retry.backoff.is_zero());
    }

    #[test]
    fn unknown_environment_is_an_error() {
        let config = Config::default();
        assert!(matches!(
            config.environment("prod"),
            Err(ConfigError::UnknownEnvironment(name)) if name == "prod"
        ));
    }
}
