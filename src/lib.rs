#![doc = "Asynchronous job executor: acquires due jobs from a shared store, runs them on a bounded worker pool, promotes timers, retries failures and dead-letters what keeps failing."]

pub mod acquire;
pub mod builder;
mod bulk;
pub mod config;
pub mod errors;
pub mod executor;
pub mod handler;
pub mod job_manager;
pub mod observation;
pub mod reset_expired;
mod sql;
pub mod store;

pub use crate::acquire::{
    AcquireJobsLifecycleListener, AcquireJobsRunnable, AcquisitionMode,
    NoopAcquireJobsLifecycleListener,
};
pub use crate::builder::{AsyncExecutorOptions, ExecutorBuildError};
pub use crate::config::{AsyncExecutorConfig, ConfigError};
pub use crate::errors::{JobExecutorError, JobHandlerError};
pub use crate::executor::AsyncExecutor;
pub use crate::handler::{HandlerRegistry, JobContext, JobHandler};
pub use crate::job_manager::{ExecutionOutcome, JobManager};
pub use crate::observation::{
    JobExecutionObservation, JobExecutionObservationProvider, NoopObservationProvider,
    ObservationScope,
};
pub use crate::reset_expired::ResetExpiredJobsRunnable;
pub use crate::store::{
    DueFilter, JobCriteria, JobQuery, JobStore, JobStoreTx, LockUpdate, MemoryJobStore,
    PgJobStore, PgJobStoreTx, TenantScope,
};

pub use job_executor_clock::mock::MockClock;
pub use job_executor_clock::{Clock, SystemClock};
pub use job_executor_job::{Job, JobTable, JobType, NewJob, NewJobBuilder};
pub use job_executor_lifecycle_hooks as lifecycle_hooks;
pub use job_executor_lifecycle_hooks::{HookRegistry, JobInsertResult, Plugin};
pub use job_executor_migrations::MigrateError;
pub use job_executor_shutdown_signal::{termination_signal, TerminationSignal};
