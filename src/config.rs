use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::TenantScope;

/// Startup validation failures. Values are never clamped into range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("`{0}` must be greater than zero")]
    MustBePositive(&'static str),

    #[error("core pool size {core} is greater than max pool size {max}")]
    CorePoolLargerThanMax { core: usize, max: usize },

    #[error("max failed job wait time {max:?} is shorter than the initial failed job wait time {initial:?}")]
    InvertedFailureBackoff { initial: Duration, max: Duration },

    #[error("lock owner must not be empty")]
    EmptyLockOwner,
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Everything that tunes acquisition, locking, the worker pool and retries.
///
/// Deserializes from camelCase keys; durations are given in milliseconds. Missing keys
/// take their default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AsyncExecutorConfig {
    pub max_timer_jobs_per_acquisition: usize,
    pub max_async_jobs_due_per_acquisition: usize,
    pub max_history_jobs_per_acquisition: usize,

    #[serde(with = "millis", rename = "defaultTimerJobAcquireWaitTimeInMillis")]
    pub default_timer_job_acquire_wait_time: Duration,
    #[serde(with = "millis", rename = "defaultAsyncJobAcquireWaitTimeInMillis")]
    pub default_async_job_acquire_wait_time: Duration,
    /// Pause of the async and history acquisition when the pool has no capacity left
    #[serde(with = "millis", rename = "defaultQueueSizeFullWaitTimeInMillis")]
    pub default_queue_size_full_wait_time: Duration,

    #[serde(with = "millis", rename = "asyncJobLockTimeInMillis")]
    pub async_job_lock_time: Duration,
    #[serde(with = "millis", rename = "timerLockTimeInMillis")]
    pub timer_lock_time: Duration,

    #[serde(with = "millis", rename = "resetExpiredJobsIntervalInMillis")]
    pub reset_expired_jobs_interval: Duration,
    pub reset_expired_jobs_page_size: usize,

    pub core_pool_size: usize,
    pub max_pool_size: usize,
    pub thread_pool_queue_size: usize,

    /// First retry delay; doubles with every further failure
    #[serde(with = "millis", rename = "asyncFailedJobWaitTimeInMillis")]
    pub async_failed_job_wait_time: Duration,
    #[serde(with = "millis", rename = "maxFailedJobWaitTimeInMillis")]
    pub max_failed_job_wait_time: Duration,
    /// How far a job refused by a saturated pool is pushed back
    #[serde(with = "millis", rename = "rejectedJobRequeueWaitTimeInMillis")]
    pub rejected_job_requeue_wait_time: Duration,

    pub default_retries: i32,
    /// Chunk size of the PostgreSQL store created at init; other stores bring their own
    pub max_in_clause_size: usize,

    /// Allow-list of categories; empty acquires every category
    pub enabled_job_categories: Vec<String>,
    /// `None` acquires for every tenant, `Some("")` only jobs without a tenant
    pub tenant_id: Option<String>,
    /// Generated when unset
    pub lock_owner: Option<String>,
    pub unlock_owned_jobs_on_shutdown: bool,
}

impl Default for AsyncExecutorConfig {
    fn default() -> Self {
        Self {
            max_timer_jobs_per_acquisition: 1,
            max_async_jobs_due_per_acquisition: 1,
            max_history_jobs_per_acquisition: 1,
            default_timer_job_acquire_wait_time: Duration::from_secs(10),
            default_async_job_acquire_wait_time: Duration::from_secs(10),
            default_queue_size_full_wait_time: Duration::ZERO,
            async_job_lock_time: Duration::from_secs(5 * 60),
            timer_lock_time: Duration::from_secs(60 * 60),
            reset_expired_jobs_interval: Duration::from_secs(60),
            reset_expired_jobs_page_size: 3,
            core_pool_size: 8,
            max_pool_size: 8,
            thread_pool_queue_size: 2048,
            async_failed_job_wait_time: Duration::from_secs(10),
            max_failed_job_wait_time: Duration::from_secs(10 * 60),
            rejected_job_requeue_wait_time: Duration::from_secs(1),
            default_retries: 3,
            max_in_clause_size: 1000,
            enabled_job_categories: Vec::new(),
            tenant_id: None,
            lock_owner: None,
            unlock_owned_jobs_on_shutdown: true,
        }
    }
}

impl AsyncExecutorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("maxTimerJobsPerAcquisition", self.max_timer_jobs_per_acquisition),
            ("maxAsyncJobsDuePerAcquisition", self.max_async_jobs_due_per_acquisition),
            ("maxHistoryJobsPerAcquisition", self.max_history_jobs_per_acquisition),
            ("resetExpiredJobsPageSize", self.reset_expired_jobs_page_size),
            ("corePoolSize", self.core_pool_size),
            ("maxPoolSize", self.max_pool_size),
            ("threadPoolQueueSize", self.thread_pool_queue_size),
            ("maxInClauseSize", self.max_in_clause_size),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::MustBePositive(name));
        }

        let positive_durations = [
            ("asyncJobLockTimeInMillis", self.async_job_lock_time),
            ("timerLockTimeInMillis", self.timer_lock_time),
            ("resetExpiredJobsIntervalInMillis", self.reset_expired_jobs_interval),
        ];
        if let Some((name, _)) = positive_durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::MustBePositive(name));
        }

        if self.default_retries <= 0 {
            return Err(ConfigError::MustBePositive("defaultRetries"));
        }

        if self.core_pool_size > self.max_pool_size {
            return Err(ConfigError::CorePoolLargerThanMax {
                core: self.core_pool_size,
                max: self.max_pool_size,
            });
        }

        if self.max_failed_job_wait_time < self.async_failed_job_wait_time {
            return Err(ConfigError::InvertedFailureBackoff {
                initial: self.async_failed_job_wait_time,
                max: self.max_failed_job_wait_time,
            });
        }

        if self.lock_owner.as_deref() == Some("") {
            return Err(ConfigError::EmptyLockOwner);
        }

        Ok(())
    }

    pub(crate) fn tenant_scope(&self) -> TenantScope {
        TenantScope::from_tenant_arg(self.tenant_id.as_deref())
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    pub(crate) fn failed_job_backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.async_failed_job_wait_time
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_failed_job_wait_time)
            .min(self.max_failed_job_wait_time)
    }
}
