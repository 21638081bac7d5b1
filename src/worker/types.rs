use std::collections::{HashMap, VecDeque};

use thiserror::Error;
use uuid::Uuid;

use crate::{
    error::TaskError,
    tasks::{
        docker::DockerClient,
        types::{Config, State, Task, TaskEvent},
    },
};

/// Single-runner executor: one queue, one store partition, one driver.
pub struct Worker {
    pub name: String,
    pub(crate) queue: VecDeque<TaskEvent>,
    pub(crate) db: HashMap<Uuid, Task>,
    pub(crate) driver: DockerClient,
    /// Task whose operation has been handed to the driver and not yet folded back.
    pub(crate) in_flight: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub enum Operation {
    Start(Config),
    Stop { container_id: String, desired: State },
}

/// A dequeued operation that can run against the driver without the worker.
pub struct Dispatch {
    pub task_id: Uuid,
    pub operation: Operation,
    pub(crate) driver: DockerClient,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    InvalidTransition(#[from] TaskError),

    #[error("unknown task {0}")]
    UnknownTask(Uuid),

    #[error("task {id} is still {state:?} and cannot be reaped")]
    NotTerminal { id: Uuid, state: State },

    #[error("task {0} already has a queued operation")]
    AlreadyQueued(Uuid),

    #[error("operation for task {0} is still in flight")]
    InFlight(Uuid),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
