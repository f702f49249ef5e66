//! The async executor: worker pool plus the acquisition and reset runnables.

mod execute;
mod pool;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use job_executor_job::{Job, JobTable};
use job_executor_lifecycle_hooks::{ExecutorShutdownContext, ExecutorStartContext, ShutdownReason};
use job_executor_shutdown_signal::termination_signal;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::acquire::{AcquireJobsLifecycleListener, AcquireJobsRunnable, AcquisitionMode};
use crate::errors::Result;
use crate::job_manager::JobManager;
use crate::observation::JobExecutionObservationProvider;
use crate::reset_expired::ResetExpiredJobsRunnable;
use crate::store::JobStore;
use execute::run_locked_job;
use pool::WorkerPool;

/// What happened to a job handed to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Submitted,
    /// The pool was saturated and the job was requeued as a timer
    Rejected,
    /// The executor is not running; the job stays locked
    Inactive,
}

#[derive(Clone)]
pub(crate) struct AcquisitionListeners {
    pub(crate) timer: Arc<dyn AcquireJobsLifecycleListener>,
    pub(crate) async_jobs_due: Arc<dyn AcquireJobsLifecycleListener>,
    pub(crate) history_jobs_due: Arc<dyn AcquireJobsLifecycleListener>,
}

impl AcquisitionListeners {
    fn for_mode(&self, mode: AcquisitionMode) -> Arc<dyn AcquireJobsLifecycleListener> {
        match mode {
            AcquisitionMode::Timer => self.timer.clone(),
            AcquisitionMode::AsyncJobsDue => self.async_jobs_due.clone(),
            AcquisitionMode::HistoryJobsDue => self.history_jobs_due.clone(),
        }
    }
}

struct Running {
    stop: CancellationToken,
    runnables: Vec<JoinHandle<()>>,
}

pub(crate) struct ExecutorInner<S: JobStore> {
    job_manager: JobManager<S>,
    observation: Arc<dyn JobExecutionObservationProvider>,
    listeners: AcquisitionListeners,
    listen_os_shutdown_signals: bool,
    active: AtomicBool,
    pool: RwLock<Option<Arc<WorkerPool>>>,
    running: Mutex<Option<Running>>,
}

/// Executes locked jobs on a bounded worker pool and drives the runnables that feed it.
///
/// Cloning yields another handle on the same executor. Call [`AsyncExecutor::shutdown`]
/// before dropping the last handle, the runnables hold handles of their own.
pub struct AsyncExecutor<S: JobStore> {
    inner: Arc<ExecutorInner<S>>,
}

impl<S: JobStore> Clone for AsyncExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: JobStore> AsyncExecutor<S> {
    pub(crate) fn new(
        job_manager: JobManager<S>,
        observation: Arc<dyn JobExecutionObservationProvider>,
        listeners: AcquisitionListeners,
        listen_os_shutdown_signals: bool,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                job_manager,
                observation,
                listeners,
                listen_os_shutdown_signals,
                active: AtomicBool::new(false),
                pool: RwLock::new(None),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn job_manager(&self) -> &JobManager<S> {
        &self.inner.job_manager
    }

    pub fn lock_owner(&self) -> &str {
        self.inner.job_manager.lock_owner()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    fn current_pool(&self) -> Option<Arc<WorkerPool>> {
        self.inner
            .pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Free slots in the pool queue while running; the configured queue size otherwise.
    pub fn remaining_capacity(&self) -> usize {
        match self.current_pool() {
            Some(pool) if self.is_active() => pool.remaining_capacity(),
            _ => self.inner.job_manager.config().thread_pool_queue_size,
        }
    }

    /// Builds the pool and spawns the runnables. Does nothing if already running.
    pub async fn start(&self) {
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            return;
        }

        let config = self.inner.job_manager.config();
        let pool = Arc::new(WorkerPool::new(
            config.core_pool_size,
            config.max_pool_size,
            config.thread_pool_queue_size,
        ));
        *self
            .inner
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(pool);
        self.inner.active.store(true, Ordering::SeqCst);

        let stop = CancellationToken::new();
        let mut runnables = Vec::with_capacity(4);
        for mode in [
            AcquisitionMode::Timer,
            AcquisitionMode::AsyncJobsDue,
            AcquisitionMode::HistoryJobsDue,
        ] {
            let runnable = AcquireJobsRunnable::with_stop_token(
                mode,
                self.clone(),
                self.inner.listeners.for_mode(mode),
                stop.child_token(),
            );
            runnables.push(tokio::spawn(async move { runnable.run().await }));
        }

        let reset = ResetExpiredJobsRunnable::with_stop_token(
            self.inner.job_manager.clone(),
            stop.child_token(),
        );
        runnables.push(tokio::spawn(async move { reset.run().await }));

        if self.inner.listen_os_shutdown_signals {
            self.spawn_signal_listener(stop.child_token());
        }

        *running = Some(Running { stop, runnables });
        drop(running);

        info!(
            lock_owner = self.lock_owner(),
            core_pool_size = config.core_pool_size,
            max_pool_size = config.max_pool_size,
            queue_size = config.thread_pool_queue_size,
            "Async executor started"
        );
        self.inner
            .job_manager
            .hooks
            .emit(ExecutorStartContext {
                lock_owner: self.lock_owner().to_string(),
                core_pool_size: config.core_pool_size,
                max_pool_size: config.max_pool_size,
                queue_size: config.thread_pool_queue_size,
            })
            .await;
    }

    fn spawn_signal_listener(&self, stopped: CancellationToken) {
        let executor = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stopped.cancelled() => {}
                _ = termination_signal() => {
                    if let Err(e) = executor.shutdown_with_reason(ShutdownReason::Signal).await {
                        error!(error = %e, "Shutdown after termination signal failed");
                    }
                }
            }
        });
    }

    /// Stops the runnables, waits for every accepted job and releases this node's locks.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_reason(ShutdownReason::Requested).await
    }

    async fn shutdown_with_reason(&self, reason: ShutdownReason) -> Result<()> {
        let mut running = self.inner.running.lock().await;
        let Some(Running { stop, runnables }) = running.take() else {
            return Ok(());
        };

        info!(lock_owner = self.lock_owner(), ?reason, "Shutting down async executor");
        stop.cancel();
        for runnable in runnables {
            if let Err(e) = runnable.await {
                warn!(error = %e, "Runnable ended abnormally");
            }
        }

        self.inner.active.store(false, Ordering::SeqCst);
        let pool = self
            .inner
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            pool.shutdown().await;
        }

        let released_jobs = if self.inner.job_manager.config().unlock_owned_jobs_on_shutdown {
            self.inner.job_manager.unacquire_owned_jobs(None).await?
        } else {
            0
        };
        drop(running);

        self.inner
            .job_manager
            .hooks
            .emit(ExecutorShutdownContext {
                lock_owner: self.lock_owner().to_string(),
                reason,
                released_jobs,
            })
            .await;
        info!(released_jobs, "Async executor stopped");
        Ok(())
    }

    /// Hands a locked executable job to the pool. `false` when the job was not accepted:
    /// a saturated pool requeues it as a timer, an inactive executor leaves it locked.
    pub async fn execute_async_job(&self, job: Job) -> bool {
        self.dispatch(JobTable::Executable, job).await == Dispatch::Submitted
    }

    /// Releases locks held by this node. See [`JobManager::unacquire_owned_jobs`].
    pub async fn unacquire_owned_jobs(&self, tenant: Option<&str>) -> Result<u64> {
        self.inner.job_manager.unacquire_owned_jobs(tenant).await
    }

    pub(crate) async fn dispatch(&self, table: JobTable, job: Job) -> Dispatch {
        let pool = match self.current_pool() {
            Some(pool) if self.is_active() => pool,
            _ => {
                debug!(job_id = %job.id(), "Executor is not running, job stays locked");
                return Dispatch::Inactive;
            }
        };

        let task = run_locked_job(
            self.inner.job_manager.clone(),
            self.inner.observation.clone(),
            table,
            job.clone(),
        )
        .boxed();

        if pool.submit(task).is_ok() {
            return Dispatch::Submitted;
        }

        match self.inner.job_manager.requeue_rejected(table, &job).await {
            Ok(_) => {}
            Err(e) if e.is_optimistic_locking() => {
                debug!(job_id = %job.id(), error = %e, "Rejected job changed before it could be requeued");
            }
            Err(e) => {
                error!(job_id = %job.id(), error = %e, "Could not requeue rejected job");
            }
        }
        Dispatch::Rejected
    }
}
