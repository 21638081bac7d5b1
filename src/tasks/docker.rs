use std::{future::Future, sync::Arc, time::Duration};

use futures_util::stream::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use super::{
    runtime::ContainerRuntime,
    types::{Action, Config, ContainerSpec, DockerResult, HostSettings, LogOutput, RestartPolicy},
};
use crate::error::{DriverError, RuntimeError};

/// Knobs the driver applies to every call.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub stop_timeout: Duration,
    pub operation_timeout: Duration,
    pub apply_host_settings: bool,
}

impl Default for DriverSettings {
    fn default() -> Self {
        DriverSettings {
            stop_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(300),
            apply_host_settings: false,
        }
    }
}

/// Translates a task configuration into what the runtime should create.
///
/// Without `apply_host_settings` only image, env and command reach the
/// runtime; restart policy, memory and ports stay informational.
pub fn container_spec(config: &Config, apply_host_settings: bool) -> ContainerSpec {
    let host = apply_host_settings.then(|| HostSettings {
        restart_policy: RestartPolicy::parse(&config.restart_policy),
        memory: (config.memory > 0).then_some(config.memory),
        exposed_ports: config.exposed_ports.clone(),
        publish_all_ports: !config.exposed_ports.is_empty(),
    });

    ContainerSpec {
        name: config.name.clone(),
        image: config.image.clone(),
        env: config.env.clone(),
        cmd: config.cmd.clone(),
        attach_stdin: config.attach_stdin,
        attach_stdout: config.attach_stdout,
        attach_stderr: config.attach_stderr,
        host,
    }
}

/// The worker's single point of contact with the container runtime.
#[derive(Clone)]
pub struct DockerClient {
    runtime: Arc<dyn ContainerRuntime>,
    settings: DriverSettings,
}

impl DockerClient {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: DriverSettings) -> Self {
        DockerClient { runtime, settings }
    }

    /// Bounds `fut` by the operation timeout.
    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, BoundedError>
    where
        F: Future<Output = Result<T, RuntimeError>>,
    {
        match tokio::time::timeout(self.settings.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) if err.is_unavailable() => Err(BoundedError::Driver(
                DriverError::RuntimeUnavailable {
                    operation,
                    source: err,
                },
            )),
            Ok(Err(err)) => Err(BoundedError::Runtime(err)),
            Err(_) => Err(BoundedError::Driver(DriverError::Timeout {
                operation,
                after: self.settings.operation_timeout,
            })),
        }
    }

    /// Pulls, creates, starts and dumps the logs of a container for `config`.
    ///
    /// Nothing is cleaned up on failure: a container whose start failed stays
    /// created and its id is reported in the result.
    pub async fn run(&self, config: &Config) -> DockerResult {
        let image = config.image.clone();

        info!(%image, "pulling image");
        if let Err(err) = self
            .bounded("image pull", self.runtime.pull_image(&image))
            .await
        {
            let err = err.or(|source| DriverError::ImagePullFailed {
                image: image.clone(),
                source,
            });
            error!(%image, error = %err, "image pull failed");
            return DockerResult::with_error(Action::Start, err, None);
        }

        let spec = container_spec(config, self.settings.apply_host_settings);
        let container_id = match self
            .bounded("container create", self.runtime.create_container(&spec))
            .await
        {
            Ok(id) => {
                info!(%image, container_id = %id, "container created");
                id
            }
            Err(err) => {
                let err = err.or(|source| DriverError::ContainerCreateFailed {
                    image: image.clone(),
                    source,
                });
                error!(%image, error = %err, "container create failed");
                return DockerResult::with_error(Action::Start, err, None);
            }
        };

        if let Err(err) = self
            .bounded("container start", self.runtime.start_container(&container_id))
            .await
        {
            let err = err.or(|source| DriverError::ContainerStartFailed {
                container_id: container_id.clone(),
                source,
            });
            error!(%container_id, error = %err, "container start failed, container left in place");
            return DockerResult::with_error(Action::Start, err, Some(container_id));
        }
        info!(%container_id, name = %config.name, "container started");

        if let Err(err) = self
            .bounded("log stream", self.stream_logs(&container_id))
            .await
        {
            let err = err.or(|source| DriverError::LogStreamFailed {
                container_id: container_id.clone(),
                source,
            });
            error!(%container_id, error = %err, "log stream failed");
            return DockerResult::with_error(Action::Start, err, Some(container_id));
        }

        let mut result = DockerResult::success(Action::Start, container_id.clone());
        if spec.host.as_ref().is_some_and(|host| host.publish_all_ports) {
            match self
                .bounded("port inspect", self.runtime.port_bindings(&container_id))
                .await
            {
                Ok(bindings) => result.port_bindings = bindings,
                Err(BoundedError::Driver(err)) => {
                    warn!(%container_id, error = %err, "could not read port bindings");
                }
                Err(BoundedError::Runtime(err)) => {
                    warn!(%container_id, error = %err, "could not read port bindings");
                }
            }
        }
        result
    }

    /// Copies the container's current output to the operator console.
    async fn stream_logs(&self, container_id: &str) -> Result<(), RuntimeError> {
        let mut logs = self.runtime.logs(container_id);
        let mut stdout = tokio::io::stdout();
        let mut stderr = tokio::io::stderr();

        while let Some(chunk) = logs.next().await {
            let written = match chunk? {
                LogOutput::StdOut(bytes) => stdout.write_all(&bytes).await,
                LogOutput::StdErr(bytes) => stderr.write_all(&bytes).await,
            };
            if let Err(e) = written {
                warn!(%container_id, error = %e, "console write failed");
            }
        }
        if let Err(e) = stdout.flush().await {
            warn!(%container_id, error = %e, "console flush failed");
        }
        Ok(())
    }

    /// Stops `container_id` with the configured grace period and removes it
    /// along with its volumes.
    pub async fn stop(&self, container_id: &str) -> DockerResult {
        if container_id.is_empty() {
            warn!("refusing to stop a task without a container id");
            return DockerResult::with_error(Action::Stop, DriverError::MissingContainerId, None);
        }
        let id = Some(container_id.to_string());

        info!(%container_id, "stopping container");
        if let Err(err) = self
            .bounded(
                "container stop",
                self.runtime
                    .stop_container(container_id, self.settings.stop_timeout),
            )
            .await
        {
            let err = err.or(|source| DriverError::ContainerStopFailed {
                container_id: container_id.to_string(),
                source,
            });
            error!(%container_id, error = %err, "container stop failed");
            return DockerResult::with_error(Action::Stop, err, id);
        }

        if let Err(err) = self
            .bounded(
                "container remove",
                self.runtime.remove_container(container_id, true),
            )
            .await
        {
            let err = err.or(|source| DriverError::ContainerRemoveFailed {
                container_id: container_id.to_string(),
                source,
            });
            error!(%container_id, error = %err, "container remove failed");
            return DockerResult::with_error(Action::Stop, err, id);
        }

        info!(%container_id, "container stopped and removed");
        DockerResult::success(Action::Stop, container_id.to_string())
    }
}

/// A bounded call either already has its driver error (timeout, runtime
/// unavailable) or needs the caller to name the failed operation.
enum BoundedError {
    Driver(DriverError),
    Runtime(RuntimeError),
}

impl BoundedError {
    fn or(self, wrap: impl FnOnce(RuntimeError) -> DriverError) -> DriverError {
        match self {
            BoundedError::Driver(err) => err,
            BoundedError::Runtime(err) => wrap(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{
        fake::{Call, FakeRuntime, Op},
        types::new_config,
        types::Task,
    };

    fn client(runtime: &Arc<FakeRuntime>, settings: DriverSettings) -> DockerClient {
        DockerClient::new(runtime.clone(), settings)
    }

    fn web_config() -> Config {
        new_config(&Task::new("web-1", "nginx:latest"))
    }

    #[test]
    fn default_translation_keeps_only_image_env_cmd() {
        let mut config = web_config();
        config.restart_policy = "always".to_string();
        config.memory = 1024;
        config.exposed_ports.insert(80);
        config.env = vec!["A=1".to_string()];

        let spec = container_spec(&config, false);

        assert_eq!(spec.image, "nginx:latest");
        assert_eq!(spec.env, vec!["A=1".to_string()]);
        assert!(spec.host.is_none());
    }

    #[test]
    fn host_translation_maps_policy_memory_and_ports() {
        let mut config = web_config();
        config.restart_policy = "Unless-Stopped".to_string();
        config.memory = 2048;
        config.exposed_ports.insert(8080);

        let host = container_spec(&config, true).host.unwrap();

        assert_eq!(host.restart_policy, RestartPolicy::UnlessStopped);
        assert_eq!(host.memory, Some(2048));
        assert!(host.publish_all_ports);
        assert!(host.exposed_ports.contains(&8080));
    }

    #[test]
    fn unknown_restart_policy_falls_back_to_no() {
        let mut config = web_config();
        config.restart_policy = "sometimes".to_string();
        let host = container_spec(&config, true).host.unwrap();
        assert_eq!(host.restart_policy, RestartPolicy::No);
        assert_eq!(host.memory, None);
        assert!(!host.publish_all_ports);
    }

    #[tokio::test]
    async fn run_pulls_creates_starts_and_reads_logs() {
        let runtime = Arc::new(FakeRuntime::new());
        let result = client(&runtime, DriverSettings::default())
            .run(&web_config())
            .await;

        assert!(result.is_success());
        assert_eq!(result.action, Action::Start);
        assert_eq!(result.action.to_string(), "start");
        assert_eq!(result.container_id.as_deref(), Some("container-1"));
        assert_eq!(result.result.as_deref(), Some("success"));
        assert_eq!(
            runtime.calls(),
            vec![
                Call::Pull("nginx:latest".to_string()),
                Call::Create("nginx:latest".to_string()),
                Call::Start("container-1".to_string()),
                Call::Logs("container-1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn pull_failure_stops_before_create() {
        let runtime = Arc::new(FakeRuntime::new().fail(Op::Pull));
        let result = client(&runtime, DriverSettings::default())
            .run(&web_config())
            .await;

        assert!(matches!(
            result.error,
            Some(DriverError::ImagePullFailed { .. })
        ));
        assert_eq!(result.container_id, None);
        assert_eq!(runtime.calls().len(), 1);
    }

    #[tokio::test]
    async fn start_failure_reports_orphaned_container() {
        let runtime = Arc::new(FakeRuntime::new().fail(Op::Start));
        let result = client(&runtime, DriverSettings::default())
            .run(&web_config())
            .await;

        assert!(matches!(
            result.error,
            Some(DriverError::ContainerStartFailed { .. })
        ));
        assert_eq!(result.container_id.as_deref(), Some("container-1"));
        assert!(
            !runtime
                .calls()
                .iter()
                .any(|call| matches!(call, Call::Stop(_) | Call::Remove(..)))
        );
    }

    #[tokio::test]
    async fn broken_log_stream_is_an_error() {
        let runtime = Arc::new(FakeRuntime::new().fail(Op::Logs));
        let result = client(&runtime, DriverSettings::default())
            .run(&web_config())
            .await;

        assert!(matches!(
            result.error,
            Some(DriverError::LogStreamFailed { .. })
        ));
        assert_eq!(result.container_id.as_deref(), Some("container-1"));
    }

    #[tokio::test]
    async fn unreachable_runtime_is_reported_as_unavailable() {
        let runtime = Arc::new(FakeRuntime::new().unavailable(Op::Create));
        let result = client(&runtime, DriverSettings::default())
            .run(&web_config())
            .await;

        assert!(matches!(
            result.error,
            Some(DriverError::RuntimeUnavailable {
                operation: "container create",
                ..
            })
        ));
        assert_eq!(result.container_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_pull_times_out() {
        let runtime = Arc::new(FakeRuntime::new().hang(Op::Pull));
        let settings = DriverSettings {
            operation_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let result = client(&runtime, settings).run(&web_config()).await;

        assert!(matches!(
            result.error,
            Some(DriverError::Timeout {
                operation: "image pull",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn published_ports_are_reported() {
        let runtime = Arc::new(FakeRuntime::new().with_binding("80/tcp", "0.0.0.0:49153"));
        let settings = DriverSettings {
            apply_host_settings: true,
            ..Default::default()
        };
        let mut config = web_config();
        config.exposed_ports.insert(80);

        let result = client(&runtime, settings).run(&config).await;

        assert!(result.is_success());
        assert_eq!(
            result.port_bindings.get("80/tcp").map(String::as_str),
            Some("0.0.0.0:49153")
        );
    }

    #[tokio::test]
    async fn stop_then_remove_with_volumes() {
        let runtime = Arc::new(FakeRuntime::new());
        let settings = DriverSettings {
            stop_timeout: Duration::from_secs(3),
            ..Default::default()
        };
        let result = client(&runtime, settings).stop("abc").await;

        assert!(result.is_success());
        assert_eq!(result.action.to_string(), "stop");
        assert_eq!(
            runtime.calls(),
            vec![
                Call::Stop("abc".to_string()),
                Call::Remove("abc".to_string(), true),
            ]
        );
        assert_eq!(runtime.last_stop_timeout(), Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn stop_without_container_id_never_reaches_runtime() {
        let runtime = Arc::new(FakeRuntime::new());
        let result = client(&runtime, DriverSettings::default()).stop("").await;

        assert!(matches!(result.error, Some(DriverError::MissingContainerId)));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn stopping_unknown_container_returns_error() {
        let runtime = Arc::new(FakeRuntime::new().fail(Op::Stop));
        let result = client(&runtime, DriverSettings::default())
            .stop("does-not-exist")
            .await;

        assert!(matches!(
            result.error,
            Some(DriverError::ContainerStopFailed { .. })
        ));
        assert_eq!(runtime.calls(), vec![Call::Stop("does-not-exist".to_string())]);
    }

    #[tokio::test]
    async fn remove_failure_is_returned() {
        let runtime = Arc::new(FakeRuntime::new().fail(Op::Remove));
        let result = client(&runtime, DriverSettings::default()).stop("abc").await;

        assert!(matches!(
            result.error,
            Some(DriverError::ContainerRemoveFailed { .. })
        ));
    }
}
