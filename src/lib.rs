//! Worker-side execution core of the cube container orchestrator.
//!
//! A [`Worker`](worker::types::Worker) drains a FIFO of task events, drives a
//! container runtime through the [`DockerClient`](tasks::docker::DockerClient)
//! driver and folds each outcome back into its task store.

pub mod config;
pub mod error;
pub mod tasks;
pub mod worker;
