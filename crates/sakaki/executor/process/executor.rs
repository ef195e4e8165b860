use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::plan::{ProcessStep, StepBody, StepGraph, StepId};
use crate::process::ops;
use crate::process::task_context::{TaskContext, TaskContextPool};
use crate::request_context::RequestContext;
use crate::scheduler::{TaskResult, WakeHandle};

/// Runs the tasks of one process step.
///
/// Task contexts live in a pool; each `run_once` draws one, performs seat
/// admission when the step emits results, runs the operator chain and
/// either completes the context or returns it for a later retry.
pub struct ProcessExecutor {
    graph: Arc<StepGraph>,
    step_id: StepId,
    contexts: TaskContextPool,
    req: Arc<RequestContext>,
    needs_seat: bool,
    total: usize,
    completed: AtomicUsize,
}

impl ProcessExecutor {
    pub fn new(
        graph: Arc<StepGraph>,
        step_id: StepId,
        contexts: Vec<Box<TaskContext>>,
        req: Arc<RequestContext>,
    ) -> Arc<Self> {
        let process = match &graph.step(step_id).body {
            StepBody::Process(p) => p,
            _ => panic!("process executor over a non-process step"),
        };
        let needs_seat = process.has_emit() && req.channel().is_some();
        let total = contexts.len();
        Arc::new(Self {
            graph,
            step_id,
            contexts: TaskContextPool::new(contexts),
            req,
            needs_seat,
            total,
            completed: AtomicUsize::new(0),
        })
    }

    fn process_step(&self) -> &ProcessStep {
        match &self.graph.step(self.step_id).body {
            StepBody::Process(p) => p,
            _ => unreachable!("validated in new"),
        }
    }

    /// All task contexts have run to completion.
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire) >= self.total
    }

    /// Executes one task slice.
    pub fn run_once(&self) -> TaskResult {
        let Some(ctx) = self.contexts.pop() else {
            // another worker holds the remaining contexts
            return TaskResult::Complete;
        };
        if self.needs_seat && ctx.seat.borrow().is_none() {
            match self.req.writer_pool().acquire_or_wait(&ctx.waker) {
                Some(seat) => {
                    *ctx.seat.borrow_mut() = Some(seat);
                }
                None => {
                    debug!(step = self.step_id, "writer seat unavailable, parking task");
                    let handle = WakeHandle::new(Arc::clone(&ctx.waker));
                    self.contexts.push(ctx);
                    return TaskResult::Sleep(handle);
                }
            }
        }
        let result = ops::run_chain(self.process_step(), &ctx, &self.req);
        // the seat is released whenever the task leaves the worker
        ctx.seat.borrow_mut().take();
        match result {
            Ok(()) => {
                ctx.finish();
                self.completed.fetch_add(1, Ordering::AcqRel);
                TaskResult::Complete
            }
            Err(e) => {
                crate::error::propagate(&self.req, e);
                ctx.finish();
                self.completed.fetch_add(1, Ordering::AcqRel);
                TaskResult::CompleteWithErrors
            }
        }
    }
}
