//! The container runtime seam and its Docker implementation.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bollard::{
    API_DEFAULT_VERSION, Docker,
    container::{
        Config as DockerConfig, CreateContainerOptions, InspectContainerOptions, LogsOptions,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    },
    errors::Error as BollardError,
    image::CreateImageOptions,
    models::{HostConfig, RestartPolicy as DockerRestartPolicy, RestartPolicyNameEnum},
};
use futures_util::stream::{BoxStream, StreamExt};
use tracing::{debug, info};

use super::types::{ContainerSpec, LogOutput, RestartPolicy};
use crate::error::RuntimeError;

const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Image and container lifecycle operations the driver needs.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ping(&self) -> Result<(), RuntimeError>;

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Returns the runtime-assigned container id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Combined stdout/stderr produced so far.
    fn logs<'a>(&'a self, container_id: &'a str) -> BoxStream<'a, Result<LogOutput, RuntimeError>>;

    async fn stop_container(&self, container_id: &str, timeout: Duration)
    -> Result<(), RuntimeError>;

    async fn remove_container(
        &self,
        container_id: &str,
        remove_volumes: bool,
    ) -> Result<(), RuntimeError>;

    /// Host bindings keyed by container port, e.g. `"80/tcp" -> "0.0.0.0:49153"`.
    async fn port_bindings(&self, container_id: &str)
    -> Result<HashMap<String, String>, RuntimeError>;
}

/// Docker Engine API client shared by every driver call of one worker.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    pub fn new(client: Docker) -> Self {
        DockerRuntime { client }
    }

    /// Connects to `host`, or to `DOCKER_HOST`/the local socket when `None`.
    pub fn connect(host: Option<&str>) -> Result<Self, RuntimeError> {
        let client = match host {
            Some(host) if host.starts_with("unix://") => Docker::connect_with_unix(
                host,
                CLIENT_TIMEOUT_SECS,
                API_DEFAULT_VERSION,
            ),
            Some(host) => {
                Docker::connect_with_http(host, CLIENT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_defaults(),
        }
        .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        Ok(DockerRuntime::new(client))
    }
}

/// Sorts client errors into the runtime error kinds the driver reasons about.
pub fn classify(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        BollardError::IOError { err } => RuntimeError::Unavailable(err.to_string()),
        BollardError::RequestTimeoutError => {
            RuntimeError::Unavailable("request to docker timed out".to_string())
        }
        other => RuntimeError::Docker(other),
    }
}

pub fn docker_restart_policy(policy: RestartPolicy) -> RestartPolicyNameEnum {
    match policy {
        RestartPolicy::No => RestartPolicyNameEnum::NO,
        RestartPolicy::Always => RestartPolicyNameEnum::ALWAYS,
        RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
        RestartPolicy::OnFailure => RestartPolicyNameEnum::ON_FAILURE,
    }
}

/// Builds the engine's create payload. Host settings are only emitted when
/// `spec.host` is set.
pub fn docker_config(spec: &ContainerSpec) -> DockerConfig<String> {
    let non_empty = |values: &Vec<String>| (!values.is_empty()).then(|| values.clone());

    let (exposed_ports, host_config) = match &spec.host {
        Some(host) => {
            let ports = host
                .exposed_ports
                .iter()
                .map(|port| (format!("{port}/tcp"), HashMap::new()))
                .collect::<HashMap<_, _>>();
            let host_config = HostConfig {
                restart_policy: Some(DockerRestartPolicy {
                    name: Some(docker_restart_policy(host.restart_policy)),
                    maximum_retry_count: None,
                }),
                memory: host.memory,
                publish_all_ports: Some(host.publish_all_ports),
                ..Default::default()
            };
            ((!ports.is_empty()).then_some(ports), Some(host_config))
        }
        None => (None, None),
    };

    DockerConfig {
        image: Some(spec.image.clone()),
        env: non_empty(&spec.env),
        cmd: non_empty(&spec.cmd),
        attach_stdin: Some(spec.attach_stdin),
        attach_stdout: Some(spec.attach_stdout),
        attach_stderr: Some(spec.attach_stderr),
        exposed_ports,
        host_config,
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.client.ping().await.map_err(classify)?;
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);

        while let Some(msg) = stream.next().await {
            let info = msg.map_err(classify)?;
            if let Some(status) = info.status {
                debug!(%image, %status, "pull progress");
            }
        }

        info!(%image, "image pulled");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let options = (!spec.name.is_empty()).then(|| CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        });

        let resp = self
            .client
            .create_container(options, docker_config(spec))
            .await
            .map_err(classify)?;

        for warning in &resp.warnings {
            debug!(container_id = %resp.id, %warning, "create warning");
        }
        Ok(resp.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(classify)
    }

    fn logs<'a>(&'a self, container_id: &'a str) -> BoxStream<'a, Result<LogOutput, RuntimeError>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        self.client
            .logs(container_id, Some(options))
            .filter_map(|item| async move {
                match item {
                    Ok(bollard::container::LogOutput::StdOut { message })
                    | Ok(bollard::container::LogOutput::Console { message }) => {
                        Some(Ok(LogOutput::StdOut(message.to_vec())))
                    }
                    Ok(bollard::container::LogOutput::StdErr { message }) => {
                        Some(Ok(LogOutput::StdErr(message.to_vec())))
                    }
                    Ok(bollard::container::LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(classify(e))),
                }
            })
            .boxed()
    }

    async fn stop_container(
        &self,
        container_id: &str,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
        };
        self.client
            .stop_container(container_id, Some(options))
            .await
            .map_err(classify)
    }

    async fn remove_container(
        &self,
        container_id: &str,
        remove_volumes: bool,
    ) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            v: remove_volumes,
            force: false,
            link: false,
        };
        self.client
            .remove_container(container_id, Some(options))
            .await
            .map_err(classify)
    }

    async fn port_bindings(
        &self,
        container_id: &str,
    ) -> Result<HashMap<String, String>, RuntimeError> {
        let inspect = self
            .client
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(classify)?;

        let ports = inspect
            .network_settings
            .and_then(|settings| settings.ports)
            .unwrap_or_default();

        let bindings = ports
            .into_iter()
            .filter_map(|(port, bindings)| {
                let binding = bindings?.into_iter().next()?;
                let host_ip = binding.host_ip.unwrap_or_else(|| "0.0.0.0".to_string());
                let host_port = binding.host_port?;
                Some((port, format!("{host_ip}:{host_port}")))
            })
            .collect();

        Ok(bindings)
    }
}
