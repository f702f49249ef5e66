use std::sync::Arc;
use std::time::Duration;

use job_executor_job::JobTable;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::config::AsyncExecutorConfig;
use crate::errors::{JobExecutorError, Result};
use crate::executor::{AsyncExecutor, Dispatch};
use crate::store::{DueFilter, JobStore};

/// Which queue an acquisition runnable drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AcquisitionMode {
    /// Due timers, promoted to executable jobs
    Timer,
    /// Due executable jobs
    AsyncJobsDue,
    /// Due history jobs
    HistoryJobsDue,
}

impl AcquisitionMode {
    pub fn table(&self) -> JobTable {
        match self {
            AcquisitionMode::Timer => JobTable::Timer,
            AcquisitionMode::AsyncJobsDue => JobTable::Executable,
            AcquisitionMode::HistoryJobsDue => JobTable::History,
        }
    }

    pub fn max_per_acquisition(&self, config: &AsyncExecutorConfig) -> usize {
        match self {
            AcquisitionMode::Timer => config.max_timer_jobs_per_acquisition,
            AcquisitionMode::AsyncJobsDue => config.max_async_jobs_due_per_acquisition,
            AcquisitionMode::HistoryJobsDue => config.max_history_jobs_per_acquisition,
        }
    }

    fn default_wait(&self, config: &AsyncExecutorConfig) -> Duration {
        match self {
            AcquisitionMode::Timer => config.default_timer_job_acquire_wait_time,
            AcquisitionMode::AsyncJobsDue | AcquisitionMode::HistoryJobsDue => {
                config.default_async_job_acquire_wait_time
            }
        }
    }

    fn lock_time(&self, config: &AsyncExecutorConfig) -> Duration {
        match self {
            AcquisitionMode::Timer => config.timer_lock_time,
            AcquisitionMode::AsyncJobsDue | AcquisitionMode::HistoryJobsDue => {
                config.async_job_lock_time
            }
        }
    }

    /// Timers are promoted, not executed, so they ignore pool saturation.
    fn respects_queue_capacity(&self) -> bool {
        !matches!(self, AcquisitionMode::Timer)
    }
}

/// Progress notifications of an acquisition runnable.
///
/// Called synchronously from the acquisition task, in order: `start_acquiring`, then
/// `acquired_jobs` and possibly `rejected_jobs`, then `start_waiting`. `stop_acquiring`
/// follows the last cycle. Implementations must return quickly.
pub trait AcquireJobsLifecycleListener: Send + Sync {
    fn start_acquiring(&self, _max_jobs: usize) {}

    fn acquired_jobs(&self, _jobs_acquired: usize, _max_jobs: usize, _remaining_capacity: usize) {}

    fn rejected_jobs(
        &self,
        _jobs_rejected: usize,
        _jobs_acquired: usize,
        _max_jobs: usize,
        _remaining_capacity: usize,
    ) {
    }

    fn optimistic_locking_exception(&self, _max_jobs: usize, _error: &JobExecutorError) {}

    fn start_waiting(&self, _millis_to_wait: u64) {}

    fn stop_acquiring(&self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAcquireJobsLifecycleListener;

impl AcquireJobsLifecycleListener for NoopAcquireJobsLifecycleListener {}

#[derive(Debug, Default)]
struct CycleOutcome {
    acquired: usize,
    rejected: usize,
}

/// Long-lived loop acquiring due jobs of one [`AcquisitionMode`] and handing them to the
/// executor.
pub struct AcquireJobsRunnable<S: JobStore> {
    mode: AcquisitionMode,
    executor: AsyncExecutor<S>,
    listener: Arc<dyn AcquireJobsLifecycleListener>,
    stop: CancellationToken,
}

impl<S: JobStore> AcquireJobsRunnable<S> {
    pub fn new(
        mode: AcquisitionMode,
        executor: AsyncExecutor<S>,
        listener: Arc<dyn AcquireJobsLifecycleListener>,
    ) -> Self {
        Self::with_stop_token(mode, executor, listener, CancellationToken::new())
    }

    pub(crate) fn with_stop_token(
        mode: AcquisitionMode,
        executor: AsyncExecutor<S>,
        listener: Arc<dyn AcquireJobsLifecycleListener>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            mode,
            executor,
            listener,
            stop,
        }
    }

    pub fn mode(&self) -> AcquisitionMode {
        self.mode
    }

    /// Wakes the runnable if it is waiting and prevents further cycles. A cycle already
    /// in progress finishes.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub async fn run(&self) {
        info!(mode = ?self.mode, "Starting job acquisition");
        while !self.stop.is_cancelled() {
            let wait = self.run_cycle().await;
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        self.listener.stop_acquiring();
        info!(mode = ?self.mode, "Stopped job acquisition");
    }

    /// One acquisition cycle. Returns how long to wait before the next one.
    pub async fn run_cycle(&self) -> Duration {
        let config = self.executor.job_manager().config();
        let max_jobs = self.mode.max_per_acquisition(config);
        self.listener.start_acquiring(max_jobs);

        let wait = if self.mode.respects_queue_capacity()
            && self.executor.remaining_capacity() == 0
        {
            debug!(mode = ?self.mode, "Worker pool queue is full, skipping acquisition");
            config.default_queue_size_full_wait_time
        } else {
            match self.acquire_and_dispatch(max_jobs).await {
                Ok(outcome) => {
                    let remaining_capacity = self.executor.remaining_capacity();
                    self.listener
                        .acquired_jobs(outcome.acquired, max_jobs, remaining_capacity);
                    if outcome.rejected > 0 {
                        self.listener.rejected_jobs(
                            outcome.rejected,
                            outcome.acquired,
                            max_jobs,
                            remaining_capacity,
                        );
                    }

                    if outcome.acquired >= max_jobs {
                        Duration::ZERO
                    } else {
                        self.mode.default_wait(config)
                    }
                }
                Err(e) if e.is_optimistic_locking() => {
                    debug!(mode = ?self.mode, error = %e, "Optimistic locking conflict during acquisition");
                    self.listener.optimistic_locking_exception(max_jobs, &e);
                    self.mode.default_wait(config)
                }
                Err(e) => {
                    error!(mode = ?self.mode, error = %e, "Job acquisition failed");
                    self.mode.default_wait(config)
                }
            }
        };

        self.listener.start_waiting(wait.as_millis() as u64);
        wait
    }

    async fn acquire_and_dispatch(&self, max_jobs: usize) -> Result<CycleOutcome> {
        let job_manager = self.executor.job_manager();
        let config = job_manager.config();
        let filter = DueFilter {
            categories: config.enabled_job_categories.clone(),
            tenant: config.tenant_scope(),
        };
        let table = self.mode.table();

        let locked = job_manager
            .acquire(table, max_jobs, self.mode.lock_time(config), &filter)
            .await?;
        let mut outcome = CycleOutcome {
            acquired: locked.len(),
            rejected: 0,
        };
        trace!(mode = ?self.mode, acquired = outcome.acquired, "Acquired jobs");

        for job in locked {
            let (dispatch_table, job) = match self.mode {
                AcquisitionMode::Timer => match job_manager.promote_acquired_timer(&job).await {
                    Ok(promoted) => (JobTable::Executable, promoted),
                    Err(e) if e.is_optimistic_locking() => {
                        debug!(timer_id = %job.id(), "Timer was moved by someone else");
                        continue;
                    }
                    Err(e) => {
                        // Stays locked until the lock expires and the reset pass frees it.
                        error!(timer_id = %job.id(), error = %e, "Could not promote timer");
                        continue;
                    }
                },
                AcquisitionMode::AsyncJobsDue | AcquisitionMode::HistoryJobsDue => (table, job),
            };

            if self.executor.dispatch(dispatch_table, job).await == Dispatch::Rejected {
                outcome.rejected += 1;
            }
        }

        Ok(outcome)
    }
}
