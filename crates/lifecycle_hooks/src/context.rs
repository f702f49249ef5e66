use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use job_executor_job::{Job, JobTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    Requested,
}

#[derive(Clone, Debug)]
pub struct ExecutorStartContext {
    pub lock_owner: String,
    pub core_pool_size: usize,
    pub max_pool_size: usize,
    pub queue_size: usize,
}

#[derive(Clone, Debug)]
pub struct ExecutorShutdownContext {
    pub lock_owner: String,
    pub reason: ShutdownReason,
    /// Jobs whose lock was handed back on the way out
    pub released_jobs: u64,
}

#[derive(Clone, Debug)]
pub struct BeforeJobInsertContext {
    pub job: Job,
    pub table: JobTable,
}

#[derive(Clone, Debug)]
pub struct JobScheduledContext {
    pub job: Arc<Job>,
    pub table: JobTable,
}

#[derive(Clone, Debug)]
pub struct TimerPromotedContext {
    pub timer: Arc<Job>,
    pub job: Arc<Job>,
}

#[derive(Clone, Debug)]
pub struct JobStartContext {
    pub job: Arc<Job>,
    pub lock_owner: String,
}

#[derive(Clone, Debug)]
pub struct JobCompleteContext {
    pub job: Arc<Job>,
    pub lock_owner: String,
    pub duration: Duration,
}

#[derive(Clone, Debug)]
pub struct JobFailContext {
    pub job: Arc<Job>,
    pub lock_owner: String,
    pub error: String,
    pub retries_left: i32,
    pub next_due_date: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug)]
pub struct JobDeadLetteredContext {
    pub job: Arc<Job>,
    pub lock_owner: String,
    pub error: String,
}

/// The worker pool refused the job; it was requeued, not failed.
#[derive(Clone, Debug)]
pub struct JobRejectedContext {
    pub job: Arc<Job>,
    pub lock_owner: String,
    pub requeued_due_date: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct ExpiredLocksResetContext {
    pub table: JobTable,
    pub reset_count: usize,
}

#[derive(Clone, Debug)]
pub struct JobsUnacquiredContext {
    pub lock_owner: String,
    pub tenant_id: Option<String>,
    pub released_count: u64,
}
