//! Scripted in-memory runtime for tests.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};

use super::{
    runtime::ContainerRuntime,
    types::{ContainerSpec, LogOutput},
};
use crate::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Pull,
    Create,
    Start,
    Logs,
    Stop,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Pull(String),
    Create(String),
    Start(String),
    Logs(String),
    Stop(String),
    Remove(String, bool),
}

#[derive(Default)]
pub struct FakeRuntime {
    failing: HashSet<Op>,
    unavailable: HashSet<Op>,
    hanging: HashSet<Op>,
    bindings: HashMap<String, String>,
    calls: Mutex<Vec<Call>>,
    created: Mutex<u32>,
    stop_timeout: Mutex<Option<Duration>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(mut self, op: Op) -> Self {
        self.failing.insert(op);
        self
    }

    pub fn unavailable(mut self, op: Op) -> Self {
        self.unavailable.insert(op);
        self
    }

    pub fn hang(mut self, op: Op) -> Self {
        self.hanging.insert(op);
        self
    }

    pub fn with_binding(mut self, port: &str, host: &str) -> Self {
        self.bindings.insert(port.to_string(), host.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_stop_timeout(&self) -> Option<Duration> {
        *self.stop_timeout.lock().unwrap()
    }

    async fn outcome(&self, op: Op, call: Call) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(call);
        if self.hanging.contains(&op) {
            std::future::pending::<()>().await;
        }
        if self.unavailable.contains(&op) {
            return Err(RuntimeError::Unavailable("connection refused".to_string()));
        }
        if self.failing.contains(&op) {
            return Err(RuntimeError::NotFound(format!("{op:?} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.outcome(Op::Pull, Call::Pull(image.to_string())).await
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.outcome(Op::Create, Call::Create(spec.image.clone()))
            .await?;
        let mut created = self.created.lock().unwrap();
        *created += 1;
        Ok(format!("container-{created}"))
    }

    async fn start_container(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.outcome(Op::Start, Call::Start(container_id.to_string()))
            .await
    }

    fn logs<'a>(&'a self, container_id: &'a str) -> BoxStream<'a, Result<LogOutput, RuntimeError>> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Logs(container_id.to_string()));
        let mut items = vec![Ok(LogOutput::StdOut(b"hello from fake\n".to_vec()))];
        if self.failing.contains(&Op::Logs) {
            items.push(Err(RuntimeError::Other("log stream broke".to_string())));
        }
        stream::iter(items).boxed()
    }

    async fn stop_container(
        &self,
        container_id: &str,
        timeout: Duration,
    ) -> Result<(), RuntimeError> {
        *self.stop_timeout.lock().unwrap() = Some(timeout);
        self.outcome(Op::Stop, Call::Stop(container_id.to_string()))
            .await
    }

    async fn remove_container(
        &self,
        container_id: &str,
        remove_volumes: bool,
    ) -> Result<(), RuntimeError> {
        self.outcome(
            Op::Remove,
            Call::Remove(container_id.to_string(), remove_volumes),
        )
        .await
    }

    async fn port_bindings(
        &self,
        _container_id: &str,
    ) -> Result<HashMap<String, String>, RuntimeError> {
        Ok(self.bindings.clone())
    }
}
