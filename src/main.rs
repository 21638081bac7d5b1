use std::{error::Error, path::PathBuf, sync::Arc};

use cube_worker::{
    config::WorkerConfig,
    tasks::{
        docker::{DockerClient, DriverSettings},
        runtime::{ContainerRuntime, DockerRuntime},
        types::{Config, Task},
    },
    worker::{types::Worker, worker::run_tasks},
};
use tokio::sync::{Mutex, watch};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = WorkerConfig::load(config_path.as_deref())?;

    // One client for the lifetime of the worker.
    let runtime = DockerRuntime::connect(config.docker_host.as_deref())?;
    if let Err(err) = runtime.ping().await {
        error!(error = %err, "docker is not reachable");
        return Err(err.into());
    }

    let driver = DockerClient::new(
        Arc::new(runtime),
        DriverSettings {
            stop_timeout: config.stop_timeout(),
            operation_timeout: config.operation_timeout(),
            apply_host_settings: config.apply_host_settings,
        },
    );
    let worker = Arc::new(Mutex::new(Worker::new(&config.name, driver)));

    let demo = Task::from_config(Config {
        name: "web-1".to_string(),
        image: "nginx:latest".to_string(),
        env: vec!["NGINX_ENTRYPOINT_QUIET_LOGS=1".to_string()],
        exposed_ports: [80].into_iter().collect(),
        restart_policy: "no".to_string(),
        ..Default::default()
    });
    let id = worker.lock().await.submit(demo)?;
    info!(task_id = %id, "submitted demo task");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(run_tasks(
        worker.clone(),
        config.poll_interval(),
        shutdown_rx,
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown_tx.send(true)?;
    runner.await?;

    let mut worker = worker.lock().await;
    let stopping = worker.stop_all();
    info!(count = stopping.len(), "stopping running tasks");
    worker.drain().await;

    for task in worker.get_tasks() {
        info!(task_id = %task.id, name = %task.name, state = ?task.state, "final state");
    }

    Ok(())
}
