use job_executor_job::JobTable;
use job_executor_migrations::MigrateError;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;

/// Errors raised by the store, the job manager and the executor.
#[derive(Error, Debug)]
pub enum JobExecutorError {
    /// An error occurred while executing an SQL query
    #[error("Error occurred while querying: {0}")]
    Sql(#[from] sqlx::Error),

    /// A handler configuration could not be (de)serialized
    #[error("Error while (de)serializing handler configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Error while migrating the job schema: {0}")]
    Migrate(#[from] MigrateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The row was changed or removed by someone else since it was read.
    ///
    /// This is routine contention between nodes and never a job failure.
    #[error("Job {job_id} in the {table} table was modified concurrently")]
    OptimisticLocking { table: JobTable, job_id: Uuid },

    #[error("Job {job_id} does not exist in the {table} table")]
    JobNotFound { table: JobTable, job_id: Uuid },

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// A `BeforeJobInsert` hook refused the job
    #[error("Job insert was rejected by a hook: {0}")]
    JobInsertRejected(String),

    /// A bulk store call received more identifiers than one statement may carry
    #[error("Bulk operation on {size} ids exceeds the maximum clause size of {max}")]
    ClauseTooLarge { size: usize, max: usize },
}

impl JobExecutorError {
    pub fn is_optimistic_locking(&self) -> bool {
        matches!(self, JobExecutorError::OptimisticLocking { .. })
    }
}

/// A Result type alias for JobExecutorError.
pub type Result<T> = core::result::Result<T, JobExecutorError>;

/// Failure reported by a job handler.
///
/// `message` ends up in the job's exception message and `details` in its stacktrace column.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct JobHandlerError {
    message: String,
    details: Option<String>,
}

impl JobHandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Captures an error together with its chain of sources.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut details = format!("{error}");
        let mut source = error.source();
        while let Some(cause) = source {
            details.push_str("\ncaused by: ");
            details.push_str(&cause.to_string());
            source = cause.source();
        }
        Self {
            message: error.to_string(),
            details: Some(details),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }
}

impl From<String> for JobHandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for JobHandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for JobHandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::from_error(&error)
    }
}

impl From<JobExecutorError> for JobHandlerError {
    fn from(error: JobExecutorError) -> Self {
        Self::from_error(&error)
    }
}
