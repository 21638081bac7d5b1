use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::{Dispatch, Operation, Worker, WorkerError, WorkerResult};
use crate::{
    error::TaskError,
    tasks::{
        docker::DockerClient,
        state::valid_state_transition,
        types::{DockerResult, State, Task, TaskEvent, new_config},
    },
};

impl Worker {
    pub fn new(name: &str, driver: DockerClient) -> Self {
        Worker {
            name: name.to_string(),
            queue: VecDeque::new(),
            db: HashMap::new(),
            driver,
            in_flight: None,
        }
    }

    /// Queues `task` to be started. The task is recorded as given (normally
    /// `Pending`) and nothing runs until [`Worker::run_next`].
    pub fn submit(&mut self, task: Task) -> WorkerResult<Uuid> {
        let id = task.id;
        self.submit_event(TaskEvent::new(State::Scheduled, task))?;
        Ok(id)
    }

    /// Queues a submitter event. `Scheduled` asks for a start, `Completed` or
    /// `Failed` asks for a stop of an already known task.
    pub fn submit_event(&mut self, event: TaskEvent) -> WorkerResult<()> {
        let id = event.task.id;

        if self.in_flight == Some(id) || self.queue.iter().any(|queued| queued.task.id == id) {
            return Err(WorkerError::AlreadyQueued(id));
        }

        let known = self.db.get(&id).map(|task| task.state);
        match (event.state, known) {
            (State::Scheduled, None) => {
                if !matches!(event.task.state, State::Pending | State::Scheduled) {
                    return Err(TaskError::InvalidTransition {
                        from: event.task.state,
                        to: State::Scheduled,
                    }
                    .into());
                }
                let task = Task {
                    container_id: None,
                    start_time: None,
                    finish_time: None,
                    port_bindings: HashMap::new(),
                    ..event.task.clone()
                };
                self.db.insert(id, task);
            }
            (State::Scheduled, Some(_)) => {}
            (State::Completed | State::Failed, Some(_)) => {}
            (State::Completed | State::Failed, None) => return Err(WorkerError::UnknownTask(id)),
            (to, known) => {
                let from = known.unwrap_or(event.task.state);
                return Err(TaskError::InvalidTransition { from, to }.into());
            }
        }

        debug!(worker = %self.name, task_id = %id, desired = ?event.state, "task event queued");
        self.queue.push_back(event);
        Ok(())
    }

    /// Queues a stop of a known task.
    pub fn request_stop(&mut self, id: Uuid) -> WorkerResult<()> {
        let task = self.db.get(&id).ok_or(WorkerError::UnknownTask(id))?.clone();
        self.submit_event(TaskEvent::new(State::Completed, task))
    }

    /// Applies the oldest queued operation.
    ///
    /// Returns `Ok(None)` when the queue is empty and `Ok(Some(result))` once
    /// the driver was called; a failed driver call is carried in
    /// `result.error`. Requests that are not legal for the task's current
    /// state are returned as errors without touching the runtime.
    pub async fn run_next(&mut self) -> WorkerResult<Option<DockerResult>> {
        let Some(dispatch) = self.begin_next()? else {
            return Ok(None);
        };
        let result = dispatch.execute().await;
        self.finish(dispatch, result).map(Some)
    }

    /// Pops the oldest queued operation, validates it against the task's
    /// current state and marks the task in flight. The returned dispatch runs
    /// without borrowing the worker; hand its result back to [`Worker::finish`].
    pub fn begin_next(&mut self) -> WorkerResult<Option<Dispatch>> {
        if let Some(id) = self.in_flight {
            return Err(WorkerError::InFlight(id));
        }
        let Some(event) = self.queue.pop_front() else {
            return Ok(None);
        };

        let id = event.task.id;
        let operation = match event.state {
            State::Scheduled => self.prepare_start(id)?,
            State::Completed | State::Failed => self.prepare_stop(id, event.state)?,
            to => {
                let from = self.db.get(&id).map(|task| task.state).unwrap_or(event.task.state);
                return Err(TaskError::InvalidTransition { from, to }.into());
            }
        };

        self.in_flight = Some(id);
        Ok(Some(Dispatch {
            task_id: id,
            operation,
            driver: self.driver.clone(),
        }))
    }

    fn prepare_start(&mut self, id: Uuid) -> WorkerResult<Operation> {
        let task = self.db.get_mut(&id).ok_or(WorkerError::UnknownTask(id))?;
        match task.state {
            State::Pending => task.transition(State::Scheduled)?,
            State::Scheduled => {}
            from => {
                return Err(TaskError::InvalidTransition {
                    from,
                    to: State::Scheduled,
                }
                .into());
            }
        }
        let config = new_config(task);
        info!(worker = %self.name, task_id = %id, image = %config.image, "starting task");
        Ok(Operation::Start(config))
    }

    fn prepare_stop(&self, id: Uuid, desired: State) -> WorkerResult<Operation> {
        let task = self.db.get(&id).ok_or(WorkerError::UnknownTask(id))?;
        if !valid_state_transition(task.state, desired) {
            return Err(TaskError::InvalidTransition {
                from: task.state,
                to: desired,
            }
            .into());
        }
        let container_id = task.container_id.clone().unwrap_or_default();
        info!(worker = %self.name, task_id = %id, %container_id, "stopping task");
        Ok(Operation::Stop {
            container_id,
            desired,
        })
    }

    /// Folds a driver result back into the task store and clears the
    /// in-flight marker.
    pub fn finish(
        &mut self,
        dispatch: Dispatch,
        result: DockerResult,
    ) -> WorkerResult<DockerResult> {
        if self.in_flight == Some(dispatch.task_id) {
            self.in_flight = None;
        }
        let id = dispatch.task_id;
        let task = self.db.get_mut(&id).ok_or(WorkerError::UnknownTask(id))?;

        match (dispatch.operation, &result.error) {
            (Operation::Start(_), None) => {
                task.transition(State::Running)?;
                task.container_id = result.container_id.clone();
                task.port_bindings = result.port_bindings.clone();
                task.start_time = Some(SystemTime::now());
                info!(task_id = %id, container_id = ?task.container_id, "task running");
            }
            (Operation::Start(_), Some(err)) => {
                task.transition(State::Failed)?;
                task.container_id = result.container_id.clone();
                task.finish_time = Some(SystemTime::now());
                warn!(task_id = %id, error = %err, container_id = ?task.container_id, "task failed to start");
            }
            (Operation::Stop { desired, .. }, None) => {
                task.transition(desired)?;
                task.finish_time = Some(SystemTime::now());
                info!(task_id = %id, state = ?task.state, "task stopped");
            }
            (Operation::Stop { .. }, Some(err)) => {
                warn!(task_id = %id, error = %err, "task stop failed, state unchanged");
            }
        }
        Ok(result)
    }

    /// Runs queued operations until the queue is empty, logging each outcome.
    /// Returns how many operations were applied.
    pub async fn drain(&mut self) -> usize {
        let name = self.name.clone();
        let mut applied = 0;
        while !self.queue.is_empty() {
            log_outcome(&name, self.run_next().await);
            applied += 1;
        }
        applied
    }

    /// Queues a stop for every running task.
    pub fn stop_all(&mut self) -> Vec<Uuid> {
        let running: Vec<Uuid> = self
            .db
            .values()
            .filter(|task| task.state == State::Running)
            .map(|task| task.id)
            .collect();

        running
            .into_iter()
            .filter(|id| match self.request_stop(*id) {
                Ok(()) => true,
                Err(err) => {
                    warn!(task_id = %id, error = %err, "could not queue stop");
                    false
                }
            })
            .collect()
    }

    /// Drops a terminal task from the live store.
    pub fn reap(&mut self, id: Uuid) -> WorkerResult<Task> {
        let task = self.db.get(&id).ok_or(WorkerError::UnknownTask(id))?;
        if !task.state.is_terminal() {
            return Err(WorkerError::NotTerminal {
                id,
                state: task.state,
            });
        }
        self.db.remove(&id).ok_or(WorkerError::UnknownTask(id))
    }

    pub fn get_task(&self, id: Uuid) -> Option<&Task> {
        self.db.get(&id)
    }

    /// Snapshot of every known task.
    pub fn get_tasks(&self) -> Vec<Task> {
        self.db.values().cloned().collect()
    }

    pub fn task_count(&self) -> usize {
        self.db.len()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl Dispatch {
    /// Runs the operation against the driver.
    pub async fn execute(&self) -> DockerResult {
        match &self.operation {
            Operation::Start(config) => self.driver.run(config).await,
            Operation::Stop { container_id, .. } => self.driver.stop(container_id).await,
        }
    }
}

fn log_outcome(worker: &str, outcome: WorkerResult<Option<DockerResult>>) {
    match outcome {
        Ok(Some(DockerResult {
            error: Some(err),
            action,
            ..
        })) => {
            error!(%worker, %action, error = %err, "task operation failed");
        }
        Ok(Some(DockerResult {
            action,
            container_id,
            ..
        })) => {
            info!(%worker, %action, ?container_id, "task operation succeeded");
        }
        Ok(None) => {}
        Err(err) => {
            error!(%worker, error = %err, "task operation rejected");
        }
    }
}

/// Drains `worker` one operation at a time until `shutdown` turns true or its
/// sender goes away, sleeping `poll_interval` whenever the queue is empty.
pub async fn run_tasks(
    worker: Arc<Mutex<Worker>>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = worker.lock().await.name.clone();
    info!(worker = %name, "task loop started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        // The lock is only held to dequeue and to fold the result back, never
        // across the driver call.
        let next = worker.lock().await.begin_next();
        let outcome = match next {
            Ok(Some(dispatch)) => {
                let result = dispatch.execute().await;
                worker.lock().await.finish(dispatch, result).map(Some)
            }
            other => other.map(|_| None),
        };
        if matches!(outcome, Ok(None)) {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            continue;
        }
        log_outcome(&name, outcome);
    }

    info!(worker = %name, "task loop stopped");
}
