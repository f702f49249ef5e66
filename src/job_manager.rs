use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use job_executor_clock::Clock;
use job_executor_job::{Job, JobTable, JobType, NewJob};
use job_executor_lifecycle_hooks::{
    BeforeJobInsertContext, HookRegistry, JobCompleteContext, JobDeadLetteredContext,
    JobFailContext, JobInsertResult, JobRejectedContext, JobScheduledContext, JobStartContext,
    JobsUnacquiredContext, TimerPromotedContext,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AsyncExecutorConfig;
use crate::errors::{JobExecutorError, JobHandlerError, Result};
use crate::handler::{HandlerRegistry, JobContext};
use crate::store::{DueFilter, JobQuery, JobStore, JobStoreTx, TenantScope};

/// `now + duration`, saturating instead of overflowing.
pub(crate) fn after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// How a finished execution left the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The handler succeeded and the row is gone
    Completed,
    /// The handler failed and the job waits in `table` for another attempt
    Retried {
        error: JobHandlerError,
        table: JobTable,
        job: Job,
    },
    /// The handler failed with no retries left
    DeadLettered { error: JobHandlerError, job: Job },
}

impl ExecutionOutcome {
    pub fn handler_error(&self) -> Option<&JobHandlerError> {
        match self {
            ExecutionOutcome::Completed => None,
            ExecutionOutcome::Retried { error, .. } | ExecutionOutcome::DeadLettered { error, .. } => {
                Some(error)
            }
        }
    }
}

/// Domain operations on jobs. Every method runs in its own unit of work.
#[derive(Clone)]
pub struct JobManager<S: JobStore> {
    pub(crate) store: S,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) hooks: Arc<HookRegistry>,
    handlers: Arc<HandlerRegistry>,
    pub(crate) config: Arc<AsyncExecutorConfig>,
    pub(crate) lock_owner: Arc<str>,
}

impl<S: JobStore> JobManager<S> {
    pub(crate) fn new(
        store: S,
        clock: Arc<dyn Clock>,
        hooks: Arc<HookRegistry>,
        handlers: Arc<HandlerRegistry>,
        config: Arc<AsyncExecutorConfig>,
        lock_owner: Arc<str>,
    ) -> Self {
        Self {
            store,
            clock,
            hooks,
            handlers,
            config,
            lock_owner,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn lock_owner(&self) -> &str {
        &self.lock_owner
    }

    pub fn config(&self) -> &AsyncExecutorConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Schedules a job that becomes executable as soon as it is acquired.
    pub async fn schedule_async_job(&self, new_job: NewJob) -> Result<Job> {
        self.schedule(JobTable::Executable, JobType::Message, new_job)
            .await
    }

    /// Schedules a timer. It is promoted to an executable job once its due date passes.
    pub async fn schedule_timer_job(&self, new_job: NewJob) -> Result<Job> {
        if new_job.due_date().is_none() {
            return Err(JobExecutorError::InvalidJob(
                "a timer job needs a due date".to_string(),
            ));
        }
        self.schedule(JobTable::Timer, JobType::Timer, new_job).await
    }

    pub async fn schedule_history_job(&self, new_job: NewJob) -> Result<Job> {
        self.schedule(JobTable::History, JobType::Message, new_job)
            .await
    }

    async fn schedule(&self, table: JobTable, job_type: JobType, new_job: NewJob) -> Result<Job> {
        if new_job.handler_type().is_empty() {
            return Err(JobExecutorError::InvalidJob(
                "handler type must not be empty".to_string(),
            ));
        }
        if matches!(new_job.retries(), Some(retries) if *retries < 0) {
            return Err(JobExecutorError::InvalidJob(
                "retries must not be negative".to_string(),
            ));
        }

        let job = Job::from_new_job(new_job, job_type, self.now(), self.config.default_retries);
        let job = match self
            .hooks
            .intercept_job_insert(BeforeJobInsertContext { job, table })
            .await
        {
            JobInsertResult::Continue(job) => job,
            JobInsertResult::Reject(reason) => {
                debug!(%table, %reason, "Job insert rejected by hook");
                return Err(JobExecutorError::JobInsertRejected(reason));
            }
        };

        let mut tx = self.store.begin().await?;
        tx.insert(table, &job).await?;
        tx.commit().await?;

        debug!(job_id = %job.id(), handler_type = %job.handler_type(), %table, "Job scheduled");
        self.hooks
            .emit(JobScheduledContext {
                job: Arc::new(job.clone()),
                table,
            })
            .await;
        Ok(job)
    }

    /// Moves a timer into the executable table, unlocked. The correlation id is kept.
    pub async fn move_timer_to_executable(&self, timer_id: Uuid) -> Result<Job> {
        let mut tx = self.store.begin().await?;
        let timer = tx
            .find_by_id(JobTable::Timer, timer_id)
            .await?
            .ok_or(JobExecutorError::JobNotFound {
                table: JobTable::Timer,
                job_id: timer_id,
            })?;
        tx.delete(JobTable::Timer, &timer).await?;
        let mut job = timer.moved();
        job.unlock();
        tx.insert(JobTable::Executable, &job).await?;
        tx.commit().await?;

        self.emit_promoted(timer, job.clone()).await;
        Ok(job)
    }

    /// Promotes a timer this node has locked, handing the lock over to the new executable row.
    pub(crate) async fn promote_acquired_timer(&self, timer: &Job) -> Result<Job> {
        let mut tx = self.store.begin().await?;
        tx.delete(JobTable::Timer, timer).await?;
        let mut job = timer.moved();
        job.lock(
            &*self.lock_owner,
            after(self.now(), self.config.async_job_lock_time),
        );
        tx.insert(JobTable::Executable, &job).await?;
        tx.commit().await?;

        self.emit_promoted(timer.clone(), job.clone()).await;
        Ok(job)
    }

    async fn emit_promoted(&self, timer: Job, job: Job) {
        debug!(timer_id = %timer.id(), job_id = %job.id(), correlation_id = %job.correlation_id(), "Timer promoted");
        self.hooks
            .emit(TimerPromotedContext {
                timer: Arc::new(timer),
                job: Arc::new(job),
            })
            .await;
    }

    /// Locks up to `limit` due rows of `table` for this node. Rows another node locked
    /// first are skipped.
    pub(crate) async fn acquire(
        &self,
        table: JobTable,
        limit: usize,
        lock_time: Duration,
        filter: &DueFilter,
    ) -> Result<Vec<Job>> {
        let now = self.now();
        let expiration = after(now, lock_time);

        let mut tx = self.store.begin().await?;
        let due = tx.find_due(table, now, limit, filter).await?;
        let mut locked = Vec::with_capacity(due.len());
        for job in due {
            match tx
                .lock_with_version_check(table, &job, &self.lock_owner, expiration)
                .await?
            {
                Some(job) => locked.push(job),
                None => debug!(job_id = %job.id(), %table, "Job was acquired by another node"),
            }
        }
        tx.commit().await?;
        Ok(locked)
    }

    /// Re-reads `job` and returns it if this node still holds a live lock on it.
    pub(crate) async fn confirm_lock(&self, table: JobTable, job: &Job) -> Result<Option<Job>> {
        let mut tx = self.store.begin().await?;
        let current = tx.find_by_id(table, *job.id()).await?;
        drop(tx);

        let now = self.now();
        Ok(current.filter(|current| {
            current.is_owned_by(&self.lock_owner) && !current.is_lock_expired(now)
        }))
    }

    /// Runs the handler of a job this node has locked and persists the outcome.
    ///
    /// Optimistic locking failures while persisting are returned as errors; the outcome
    /// has then not been recorded.
    #[tracing::instrument(skip_all, fields(job_id = %job.id(), handler_type = %job.handler_type(), %table))]
    pub async fn execute(&self, table: JobTable, job: Job) -> Result<ExecutionOutcome> {
        let job = Arc::new(job);
        self.hooks
            .emit(JobStartContext {
                job: job.clone(),
                lock_owner: self.lock_owner.to_string(),
            })
            .await;

        let started = Instant::now();
        let ctx = JobContext::new(job.clone(), table, self.lock_owner.clone());
        match self.handlers.run(ctx).await {
            Ok(()) => {
                let mut tx = self.store.begin().await?;
                tx.delete(table, &job).await?;
                tx.commit().await?;

                let duration = started.elapsed();
                debug!(?duration, "Job completed");
                self.hooks
                    .emit(JobCompleteContext {
                        job,
                        lock_owner: self.lock_owner.to_string(),
                        duration,
                    })
                    .await;
                Ok(ExecutionOutcome::Completed)
            }
            Err(error) => self.handle_failure(table, &job, error).await,
        }
    }

    async fn handle_failure(
        &self,
        table: JobTable,
        job: &Job,
        error: JobHandlerError,
    ) -> Result<ExecutionOutcome> {
        let now = self.now();
        let mut tx = self.store.begin().await?;
        let current = tx
            .find_by_id(table, *job.id())
            .await?
            .filter(|current| current.revision() == job.revision())
            .ok_or(JobExecutorError::OptimisticLocking {
                table,
                job_id: *job.id(),
            })?;

        let remaining = current.retries() - 1;
        let attempts = current.attempts() + 1;
        let exception = (
            Some(error.message().to_string()),
            error.details().map(str::to_string),
        );

        if remaining > 0 {
            let due = after(now, self.config.failed_job_backoff(attempts.max(1) as u32));

            let mut next = current.clone();
            next.set_retries(remaining);
            next.set_attempts(attempts);
            next.unlock();
            next.set_due_date(Some(due));
            next.set_exception(exception.0, exception.1);

            let (retry_table, retried) = if table == JobTable::History {
                (JobTable::History, tx.update(JobTable::History, &next).await?)
            } else {
                tx.delete(table, &current).await?;
                let timer = next.moved();
                tx.insert(JobTable::Timer, &timer).await?;
                (JobTable::Timer, timer)
            };
            tx.commit().await?;

            warn!(
                job_id = %job.id(),
                retries_left = remaining,
                next_due_date = %due,
                error = %error,
                "Job failed, retrying later"
            );
            self.hooks
                .emit(JobFailContext {
                    job: Arc::new(retried.clone()),
                    lock_owner: self.lock_owner.to_string(),
                    error: error.to_string(),
                    retries_left: remaining,
                    next_due_date: Some(due),
                })
                .await;

            Ok(ExecutionOutcome::Retried {
                error,
                table: retry_table,
                job: retried,
            })
        } else {
            tx.delete(table, &current).await?;
            let mut dead = current.moved();
            dead.set_retries(0);
            dead.set_attempts(attempts);
            dead.unlock();
            dead.set_exception(exception.0, exception.1);
            tx.insert(JobTable::DeadLetter, &dead).await?;
            tx.commit().await?;

            warn!(job_id = %job.id(), dead_letter_id = %dead.id(), error = %error, "Job exhausted its retries");
            self.hooks
                .emit(JobDeadLetteredContext {
                    job: Arc::new(dead.clone()),
                    lock_owner: self.lock_owner.to_string(),
                    error: error.to_string(),
                })
                .await;

            Ok(ExecutionOutcome::DeadLettered { error, job: dead })
        }
    }

    /// Requeues a job the worker pool refused. Retries are not consumed.
    pub(crate) async fn requeue_rejected(&self, table: JobTable, job: &Job) -> Result<Job> {
        let due = after(self.now(), self.config.rejected_job_requeue_wait_time);
        let mut tx = self.store.begin().await?;
        let current = tx
            .find_by_id(table, *job.id())
            .await?
            .filter(|current| current.revision() == job.revision())
            .ok_or(JobExecutorError::OptimisticLocking {
                table,
                job_id: *job.id(),
            })?;

        let mut requeued = current.clone();
        requeued.unlock();
        requeued.set_due_date(Some(due));
        let requeued = if table == JobTable::History {
            tx.update(JobTable::History, &requeued).await?
        } else {
            tx.delete(table, &current).await?;
            let timer = requeued.moved();
            tx.insert(JobTable::Timer, &timer).await?;
            timer
        };
        tx.commit().await?;

        info!(job_id = %job.id(), requeued_id = %requeued.id(), due_date = %due, "Job rejected by a saturated worker pool");
        self.hooks
            .emit(JobRejectedContext {
                job: Arc::new(requeued.clone()),
                lock_owner: self.lock_owner.to_string(),
                requeued_due_date: due,
            })
            .await;
        Ok(requeued)
    }

    /// Releases every lock held by this node.
    ///
    /// `None` releases across all tenants, `Some("")` only jobs without a tenant.
    pub async fn unacquire_owned_jobs(&self, tenant: Option<&str>) -> Result<u64> {
        let scope = TenantScope::from_tenant_arg(tenant);
        let mut tx = self.store.begin().await?;
        let mut released = 0;
        for table in JobTable::LOCKABLE {
            released += tx.unlock_owned(table, &self.lock_owner, &scope).await?;
        }
        tx.commit().await?;

        info!(lock_owner = %self.lock_owner, ?tenant, released, "Released owned jobs");
        self.hooks
            .emit(JobsUnacquiredContext {
                lock_owner: self.lock_owner.to_string(),
                tenant_id: tenant.map(str::to_string),
                released_count: released,
            })
            .await;
        Ok(released)
    }

    /// Clears one page of expired locks in `table`. Returns how many rows were found and
    /// how many were reset.
    pub(crate) async fn reset_expired_page(
        &self,
        table: JobTable,
        page_size: usize,
    ) -> Result<(usize, usize)> {
        let now = self.now();
        let mut tx = self.store.begin().await?;
        let expired = tx.find_expired_locks(table, now, page_size).await?;
        let mut reset = 0;
        for job in &expired {
            if tx.reset_expired_lock(table, job).await? {
                reset += 1;
            } else {
                debug!(job_id = %job.id(), %table, "Expired lock was renewed concurrently");
            }
        }
        tx.commit().await?;
        Ok((expired.len(), reset))
    }

    /// Moves a dead-letter job back into the executable table with fresh retries.
    pub async fn move_dead_letter_job_to_executable(&self, id: Uuid, retries: i32) -> Result<Job> {
        let mut tx = self.store.begin().await?;
        let dead = tx
            .find_by_id(JobTable::DeadLetter, id)
            .await?
            .ok_or(JobExecutorError::JobNotFound {
                table: JobTable::DeadLetter,
                job_id: id,
            })?;
        tx.delete(JobTable::DeadLetter, &dead).await?;
        let job = revived(&dead, retries);
        tx.insert(JobTable::Executable, &job).await?;
        tx.commit().await?;
        Ok(job)
    }

    pub async fn delete_dead_letter_job(&self, id: Uuid) -> Result<()> {
        self.delete_job(JobTable::DeadLetter, id).await
    }

    pub async fn delete_job(&self, table: JobTable, id: Uuid) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let job = tx
            .find_by_id(table, id)
            .await?
            .ok_or(JobExecutorError::JobNotFound { table, job_id: id })?;
        tx.delete(table, &job).await?;
        tx.commit().await
    }

    pub async fn find_job(&self, table: JobTable, id: Uuid) -> Result<Option<Job>> {
        let mut tx = self.store.begin().await?;
        let job = tx.find_by_id(table, id).await?;
        Ok(job)
    }

    pub async fn find_jobs(&self, table: JobTable, query: &JobQuery) -> Result<Vec<Job>> {
        let mut tx = self.store.begin().await?;
        let jobs = tx.find(table, query).await?;
        Ok(jobs)
    }

    pub async fn count_jobs(&self, table: JobTable, query: &JobQuery) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let count = tx.count(table, query).await?;
        Ok(count)
    }
}

/// Executable copy of a dead-letter job.
pub(crate) fn revived(dead: &Job, retries: i32) -> Job {
    let mut job = dead.moved();
    job.set_retries(retries);
    job.set_attempts(0);
    job.unlock();
    job.set_due_date(None);
    job.set_exception(None, None);
    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn after_saturates() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            after(now, Duration::from_secs(90)),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 30).unwrap()
        );
        assert_eq!(after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn revived_job_is_clean() {
        let mut dead = Job::from_new_job(NewJob::new("mail"), JobType::Message, Utc::now(), 3);
        dead.set_retries(0);
        dead.set_attempts(3);
        dead.set_exception(Some("boom".into()), Some("trace".into()));
        let job = revived(&dead, 5);
        assert_eq!(job.retries(), &5);
        assert_eq!(job.attempts(), &0);
        assert_eq!(job.correlation_id(), dead.correlation_id());
        assert_ne!(job.id(), dead.id());
        assert!(job.exception_message().is_none());
        assert!(!job.is_locked());
    }
}
