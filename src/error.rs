use std::time::Duration;

use thiserror::Error;

use crate::tasks::types::State;

/// Errors reported by a [`ContainerRuntime`](crate::tasks::runtime::ContainerRuntime).
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("no such object: {0}")]
    NotFound(String),

    #[error("docker api error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("{0}")]
    Other(String),
}

impl RuntimeError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RuntimeError::Unavailable(_))
    }
}

/// Outcome errors of the container driver. The executor never sees a
/// runtime-native error, only one of these.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("container runtime unavailable during {operation}: {source}")]
    RuntimeUnavailable {
        operation: &'static str,
        #[source]
        source: RuntimeError,
    },

    #[error("failed to pull image {image}: {source}")]
    ImagePullFailed {
        image: String,
        #[source]
        source: RuntimeError,
    },

    #[error("failed to create container from image {image}: {source}")]
    ContainerCreateFailed {
        image: String,
        #[source]
        source: RuntimeError,
    },

    #[error("failed to start container {container_id}: {source}")]
    ContainerStartFailed {
        container_id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("failed to stream logs of container {container_id}: {source}")]
    LogStreamFailed {
        container_id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("failed to stop container {container_id}: {source}")]
    ContainerStopFailed {
        container_id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("failed to remove container {container_id}: {source}")]
    ContainerRemoveFailed {
        container_id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("stop requested without a container id")]
    MissingContainerId,

    #[error("{operation} did not finish within {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: State, to: State },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },
}
