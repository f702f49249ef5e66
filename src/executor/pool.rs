use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::task::TaskTracker;
use tracing::{error, trace};

pub(crate) type PoolTask = BoxFuture<'static, ()>;

#[derive(Default)]
struct PoolState {
    queue: VecDeque<PoolTask>,
    workers: usize,
    closed: bool,
}

/// Bounded pool of worker tasks in front of a bounded queue.
///
/// Submission starts a worker while fewer than `core_pool_size` run, then queues, then
/// grows up to `max_pool_size`, and otherwise hands the task back. It never waits.
pub(crate) struct WorkerPool {
    core_pool_size: usize,
    max_pool_size: usize,
    queue_capacity: usize,
    state: Arc<Mutex<PoolState>>,
    tracker: TaskTracker,
}

fn lock(state: &Mutex<PoolState>) -> MutexGuard<'_, PoolState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkerPool {
    pub(crate) fn new(core_pool_size: usize, max_pool_size: usize, queue_capacity: usize) -> Self {
        Self {
            core_pool_size,
            max_pool_size,
            queue_capacity,
            state: Arc::default(),
            tracker: TaskTracker::new(),
        }
    }

    /// Accepts `task` or returns it when the pool is saturated or shut down.
    pub(crate) fn submit(&self, task: PoolTask) -> Result<(), PoolTask> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(task);
        }

        if state.workers < self.core_pool_size {
            state.workers += 1;
            drop(state);
            self.spawn_worker(task);
            return Ok(());
        }

        if state.queue.len() < self.queue_capacity {
            state.queue.push_back(task);
            return Ok(());
        }

        if state.workers < self.max_pool_size {
            state.workers += 1;
            drop(state);
            self.spawn_worker(task);
            return Ok(());
        }

        Err(task)
    }

    fn spawn_worker(&self, first: PoolTask) {
        let state = self.state.clone();
        self.tracker.spawn(async move {
            let mut next = Some(first);
            while let Some(task) = next {
                // A panicking task must not take its worker slot down with it
                if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                    error!("Pool task panicked");
                }
                let mut guard = lock(&state);
                next = guard.queue.pop_front();
                if next.is_none() {
                    guard.workers -= 1;
                }
            }
            trace!("Pool worker idle, exiting");
        });
    }

    pub(crate) fn remaining_capacity(&self) -> usize {
        self.queue_capacity
            .saturating_sub(lock(&self.state).queue.len())
    }

    pub(crate) fn active_workers(&self) -> usize {
        lock(&self.state).workers
    }

    /// Refuses new tasks and waits until everything already accepted has run.
    pub(crate) async fn shutdown(&self) {
        lock(&self.state).closed = true;
        self.tracker.close();
        self.tracker.wait().await;
    }
}
