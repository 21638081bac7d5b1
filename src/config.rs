//! Worker configuration.
//!
//! Values come from an optional JSON file and are then overridden by
//! `CUBE_*` environment variables.

use std::{path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

pub const ENV_NAME: &str = "CUBE_WORKER_NAME";
pub const ENV_DOCKER_HOST: &str = "CUBE_DOCKER_HOST";
pub const ENV_POLL_INTERVAL_MS: &str = "CUBE_POLL_INTERVAL_MS";
pub const ENV_STOP_TIMEOUT_SECS: &str = "CUBE_STOP_TIMEOUT_SECS";
pub const ENV_OPERATION_TIMEOUT_SECS: &str = "CUBE_OPERATION_TIMEOUT_SECS";
pub const ENV_APPLY_HOST_SETTINGS: &str = "CUBE_APPLY_HOST_SETTINGS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub name: String,
    /// Docker endpoint (`unix:///...`, `tcp://...`, `http://...`). Falls back
    /// to `DOCKER_HOST` and then the local socket.
    pub docker_host: Option<String>,
    pub poll_interval_ms: u64,
    /// Grace period handed to the runtime's stop call.
    pub stop_timeout_secs: u64,
    /// Deadline for every individual runtime call.
    pub operation_timeout_secs: u64,
    /// Translate restart policy, memory and ports into host-level settings.
    pub apply_host_settings: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            name: "worker-1".to_string(),
            docker_host: None,
            poll_interval_ms: 1000,
            stop_timeout_secs: 10,
            operation_timeout_secs: 300,
            apply_host_settings: false,
        }
    }
}

impl WorkerConfig {
    /// Loads the file at `path` (if any), then applies the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), "loaded worker config");
        Ok(config)
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup(ENV_NAME) {
            self.name = name;
        }
        if let Some(host) = lookup(ENV_DOCKER_HOST) {
            self.docker_host = Some(host);
        }
        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            self.poll_interval_ms = parse_env(ENV_POLL_INTERVAL_MS, raw)?;
        }
        if let Some(raw) = lookup(ENV_STOP_TIMEOUT_SECS) {
            self.stop_timeout_secs = parse_env(ENV_STOP_TIMEOUT_SECS, raw)?;
        }
        if let Some(raw) = lookup(ENV_OPERATION_TIMEOUT_SECS) {
            self.operation_timeout_secs = parse_env(ENV_OPERATION_TIMEOUT_SECS, raw)?;
        }
        if let Some(raw) = lookup(ENV_APPLY_HOST_SETTINGS) {
            self.apply_host_settings = parse_env(ENV_APPLY_HOST_SETTINGS, raw)?;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

fn parse_env<T: FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value: raw })
}
