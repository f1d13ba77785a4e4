//! `load_config` module: loads the static YAML config into the core [`Config`].
//!
//! This is the only place where user-supplied YAML is parsed. Secrets never
//! live in the file: the management service token and the indexing service key
//! are read from the environment by the clients that need them.
//!
//! # Errors
//! All errors use `anyhow::Error` with the config path attached, and are
//! surfaced at the CLI boundary.
use anyhow::Result;
use apim_migrate_core::config::{Config, EnvironmentConfig};
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {}: {}",
                path_ref.display(),
                e
            ));
        }
    };

    let config: Config = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!(
                "Failed to parse config YAML {}: {e}",
                path_ref.display()
            ));
        }
    };

    config.trace_loaded();
    Ok(config)
}

/// Looks up `environment` and fails with the list of known names if absent.
pub fn environment<'a>(config: &'a Config, environment: &str) -> Result<&'a EnvironmentConfig> {
    config.environment(environment).map_err(|e| {
        let known: Vec<&str> = config.environments.keys().map(String::as_str).collect();
        anyhow::anyhow!("{e} (known environments: [{}])", known.join(", "))
    })
}
