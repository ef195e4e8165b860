//! Cooperative task scheduling over the step DAG.

pub mod dag;
pub mod serial;
pub mod worker_pool;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use dag::StepState;
pub use serial::SerialScheduler;
pub use worker_pool::WorkerPool;

use crate::process::ProcessExecutor;

/// Wakeup flag of a sleeping task.
#[derive(Clone)]
pub struct WakeHandle(Arc<AtomicBool>);

impl WakeHandle {
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of one task slice.
pub enum TaskResult {
    Complete,
    CompleteWithErrors,
    /// Re-queue; the task can make progress immediately.
    Yield,
    /// Park until the handle fires.
    Sleep(WakeHandle),
}

/// A schedulable unit of work.
pub trait SchedulableTask: Send {
    fn run(&mut self) -> TaskResult;
}

/// Main task of a process step; many of these share one executor.
pub struct ProcessTask {
    executor: Arc<ProcessExecutor>,
}

impl ProcessTask {
    pub fn new(executor: Arc<ProcessExecutor>) -> Self {
        Self { executor }
    }
}

impl SchedulableTask for ProcessTask {
    fn run(&mut self) -> TaskResult {
        self.executor.run_once()
    }
}
