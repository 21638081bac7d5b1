use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    time::SystemTime,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DriverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Set once a create call succeeded; never cleared by the executor.
    pub container_id: Option<String>,
    pub name: String,
    pub state: State,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub memory: u64,
    pub disk: u64,
    pub exposed_ports: BTreeSet<u16>,
    /// `"80/tcp" -> "0.0.0.0:49153"`, filled in after start.
    pub port_bindings: HashMap<String, String>,
    pub restart_policy: String,
    pub start_time: Option<SystemTime>,
    pub finish_time: Option<SystemTime>,
}

impl Task {
    pub fn new(name: &str, image: &str) -> Self {
        Task {
            id: Uuid::new_v4(),
            container_id: None,
            name: name.to_string(),
            state: State::Pending,
            image: image.to_string(),
            cmd: Vec::new(),
            env: Vec::new(),
            memory: 0,
            disk: 0,
            exposed_ports: BTreeSet::new(),
            port_bindings: HashMap::new(),
            restart_policy: String::new(),
            start_time: None,
            finish_time: None,
        }
    }

    /// Copies a submitter's configuration into a fresh pending task.
    ///
    /// Negative `memory`/`disk` requests are treated as "no request" and
    /// stored as 0, since task resource fields are unsigned.
    pub fn from_config(config: Config) -> Self {
        Task {
            cmd: config.cmd,
            env: config.env,
            memory: u64::try_from(config.memory).unwrap_or(0),
            disk: u64::try_from(config.disk).unwrap_or(0),
            exposed_ports: config.exposed_ports,
            restart_policy: config.restart_policy,
            ..Task::new(&config.name, &config.image)
        }
    }
}

/// A submitter's request for `task` to reach `state`. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: Uuid,
    pub state: State,
    pub timestamp: SystemTime,
    pub task: Task,
}

impl TaskEvent {
    pub fn new(state: State, task: Task) -> Self {
        TaskEvent {
            id: Uuid::new_v4(),
            state,
            timestamp: SystemTime::now(),
            task,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub name: String,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub exposed_ports: BTreeSet<u16>,
    pub cmd: Vec<String>,
    pub image: String,
    pub memory: i64,
    pub disk: i64,
    pub env: Vec<String>,
    pub restart_policy: String,
}

pub fn new_config(task: &Task) -> Config {
    Config {
        name: task.name.clone(),
        attach_stdin: false,
        attach_stdout: true,
        attach_stderr: true,
        exposed_ports: task.exposed_ports.clone(),
        cmd: task.cmd.clone(),
        image: task.image.clone(),
        memory: i64::try_from(task.memory).unwrap_or(i64::MAX),
        disk: i64::try_from(task.disk).unwrap_or(i64::MAX),
        env: task.env.clone(),
        restart_policy: task.restart_policy.clone(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Start => write!(f, "start"),
            Action::Stop => write!(f, "stop"),
        }
    }
}

/// Outcome of one driver call.
#[derive(Debug)]
pub struct DockerResult {
    pub error: Option<DriverError>,
    pub action: Action,
    /// Present whenever a container exists, including a created container
    /// whose start failed.
    pub container_id: Option<String>,
    pub result: Option<String>,
    pub port_bindings: HashMap<String, String>,
}

impl DockerResult {
    pub fn with_error(action: Action, err: DriverError, container_id: Option<String>) -> Self {
        DockerResult {
            error: Some(err),
            action,
            container_id,
            result: None,
            port_bindings: HashMap::new(),
        }
    }

    pub fn success(action: Action, container_id: String) -> Self {
        DockerResult {
            error: None,
            action,
            container_id: Some(container_id),
            result: Some("success".to_string()),
            port_bindings: HashMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    UnlessStopped,
    OnFailure,
}

impl RestartPolicy {
    /// Unknown or empty policy names fall back to [`RestartPolicy::No`].
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "always" => RestartPolicy::Always,
            "unless-stopped" => RestartPolicy::UnlessStopped,
            "on-failure" => RestartPolicy::OnFailure,
            _ => RestartPolicy::No,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostSettings {
    pub restart_policy: RestartPolicy,
    pub memory: Option<i64>,
    pub exposed_ports: BTreeSet<u16>,
    pub publish_all_ports: bool,
}

/// What the runtime is asked to create, independent of any client library.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub cmd: Vec<String>,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub host: Option<HostSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    StdOut(Vec<u8>),
    StdErr(Vec<u8>),
}
