use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam::deque::{Injector, Steal, Stealer, Worker};
use tracing::{debug, warn};

use sakaki_common::config::Config;

use super::{SchedulableTask, TaskResult, WakeHandle};

type Task = Box<dyn SchedulableTask>;

/// Parallel scheduler: a bounded set of workers with per-worker run queues,
/// a shared injector, optional stealing, and a parked list for sleeping
/// tasks.
///
/// Core-affinity knobs of the configuration are accepted but pinning is not
/// performed here; workers are plain OS threads.
pub struct WorkerPool {
    workers: usize,
    work_sharing: bool,
    stealing_enabled: bool,
}

impl WorkerPool {
    pub fn new(config: &Config) -> Self {
        if config.core_affinity {
            warn!("core affinity requested; workers run unpinned");
        }
        Self {
            workers: config.thread_pool_size.max(1),
            work_sharing: config.work_sharing,
            stealing_enabled: config.stealing_enabled,
        }
    }

    /// Runs every task to completion; returns whether any reported errors.
    pub fn run(&self, tasks: Vec<Task>) -> bool {
        let injector: Injector<Task> = Injector::new();
        let mut remaining = 0usize;
        for t in tasks {
            injector.push(t);
            remaining += 1;
        }
        let outstanding = AtomicUsize::new(remaining);
        let saw_errors = AtomicBool::new(false);
        let parked: Mutex<Vec<(WakeHandle, Task)>> = Mutex::new(Vec::new());
        let stealers: Mutex<Vec<Stealer<Task>>> = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for worker_index in 0..self.workers {
                let injector = &injector;
                let outstanding = &outstanding;
                let saw_errors = &saw_errors;
                let parked = &parked;
                let stealers = &stealers;
                let work_sharing = self.work_sharing;
                let stealing_enabled = self.stealing_enabled;
                scope.spawn(move || {
                    let local: Worker<Task> = Worker::new_fifo();
                    if stealing_enabled {
                        stealers.lock().expect("stealers poisoned").push(local.stealer());
                    }
                    debug!(worker = worker_index, "scheduler worker started");
                    loop {
                        if outstanding.load(Ordering::Acquire) == 0 {
                            break;
                        }
                        let task = Self::find_task(
                            &local,
                            injector,
                            stealers,
                            parked,
                            work_sharing,
                            stealing_enabled,
                        );
                        let Some(mut task) = task else {
                            std::thread::yield_now();
                            continue;
                        };
                        match task.run() {
                            TaskResult::Complete => {
                                outstanding.fetch_sub(1, Ordering::AcqRel);
                            }
                            TaskResult::CompleteWithErrors => {
                                saw_errors.store(true, Ordering::Release);
                                outstanding.fetch_sub(1, Ordering::AcqRel);
                            }
                            TaskResult::Yield => {
                                if work_sharing {
                                    injector.push(task);
                                } else {
                                    local.push(task);
                                }
                            }
                            TaskResult::Sleep(handle) => {
                                parked.lock().expect("parked poisoned").push((handle, task));
                            }
                        }
                    }
                });
            }
        });
        saw_errors.load(Ordering::Acquire)
    }

    fn find_task(
        local: &Worker<Task>,
        injector: &Injector<Task>,
        stealers: &Mutex<Vec<Stealer<Task>>>,
        parked: &Mutex<Vec<(WakeHandle, Task)>>,
        _work_sharing: bool,
        stealing_enabled: bool,
    ) -> Option<Task> {
        if let Some(task) = local.pop() {
            return Some(task);
        }
        loop {
            match injector.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => break,
                Steal::Retry => {}
            }
        }
        if stealing_enabled {
            let held = stealers.lock().expect("stealers poisoned");
            for stealer in held.iter() {
                loop {
                    match stealer.steal() {
                        Steal::Success(task) => return Some(task),
                        Steal::Empty => break,
                        Steal::Retry => {}
                    }
                }
            }
        }
        // resume a parked task whose wakeup fired; if everything stalled,
        // requeue them all rather than hang
        let mut held = parked.lock().expect("parked poisoned");
        if let Some(pos) = held.iter().position(|(handle, _)| handle.ready()) {
            return Some(held.remove(pos).1);
        }
        if !held.is_empty() && injector.is_empty() {
            return Some(held.remove(0).1);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct TouchTask {
        counter: Arc<AtomicUsize>,
        yields: usize,
    }

    impl SchedulableTask for TouchTask {
        fn run(&mut self) -> TaskResult {
            if self.yields > 0 {
                self.yields -= 1;
                return TaskResult::Yield;
            }
            self.counter.fetch_add(1, Ordering::AcqRel);
            TaskResult::Complete
        }
    }

    fn config(workers: usize, stealing: bool) -> Config {
        Config {
            thread_pool_size: workers,
            stealing_enabled: stealing,
            ..Config::default()
        }
    }

    #[test]
    fn all_tasks_complete() {
        let pool = WorkerPool::new(&config(4, true));
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<Box<dyn SchedulableTask>> = (0..32)
            .map(|i| {
                Box::new(TouchTask { counter: Arc::clone(&counter), yields: i % 3 })
                    as Box<dyn SchedulableTask>
            })
            .collect();
        assert!(!pool.run(tasks));
        assert_eq!(counter.load(Ordering::Acquire), 32);
    }

    #[test]
    fn works_without_stealing() {
        let pool = WorkerPool::new(&config(2, false));
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<Box<dyn SchedulableTask>> = (0..8)
            .map(|_| {
                Box::new(TouchTask { counter: Arc::clone(&counter), yields: 1 })
                    as Box<dyn SchedulableTask>
            })
            .collect();
        assert!(!pool.run(tasks));
        assert_eq!(counter.load(Ordering::Acquire), 8);
    }
}
