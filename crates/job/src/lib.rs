use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

mod new_job;

pub use new_job::{NewJob, NewJobBuilder};

/// Whether a job runs as soon as it is acquired or waits for its due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Message,
    Timer,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Message => "message",
            JobType::Timer => "timer",
        }
    }
}

impl Display for JobType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownJobType(pub String);

impl Display for UnknownJobType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown job type '{}'", self.0)
    }
}

impl std::error::Error for UnknownJobType {}

impl FromStr for JobType {
    type Err = UnknownJobType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(JobType::Message),
            "timer" => Ok(JobType::Timer),
            other => Err(UnknownJobType(other.to_string())),
        }
    }
}

/// The storage a job currently lives in. A job is in exactly one table at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTable {
    /// Executable jobs, eligible for dispatch once due and unlocked
    Executable,
    /// Timer jobs waiting for their due date
    Timer,
    /// Jobs whose retries are exhausted
    DeadLetter,
    /// Asynchronous history side-work, an independent queue
    History,
}

impl JobTable {
    pub const ALL: [JobTable; 4] = [
        JobTable::Executable,
        JobTable::Timer,
        JobTable::DeadLetter,
        JobTable::History,
    ];

    /// Tables whose rows can carry a lock.
    pub const LOCKABLE: [JobTable; 3] = [JobTable::Executable, JobTable::Timer, JobTable::History];

    pub fn table_name(&self) -> &'static str {
        match self {
            JobTable::Executable => "_private_jobs",
            JobTable::Timer => "_private_timer_jobs",
            JobTable::DeadLetter => "_private_deadletter_jobs",
            JobTable::History => "_private_history_jobs",
        }
    }
}

impl Display for JobTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let display = match self {
            JobTable::Executable => "executable",
            JobTable::Timer => "timer",
            JobTable::DeadLetter => "dead_letter",
            JobTable::History => "history",
        };
        f.write_str(display)
    }
}

/// A job row, in whichever table it currently lives.
///
/// `lock_owner` and `lock_expiration_time` are either both set or both unset; the only
/// way to change them is through [`Job::lock`] and [`Job::unlock`].
#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct Job {
    /// Row identifier, changes when the job moves between tables
    id: Uuid,
    /// Logical identity, survives every move between tables
    correlation_id: Uuid,
    job_type: JobType,
    /// Key into the handler registry
    handler_type: String,
    /// Opaque parameters handed to the handler
    handler_configuration: Option<Value>,
    /// Opaque pass-through value owned by whoever scheduled the job
    custom_values: Option<String>,
    /// `None` or in the past means eligible for acquisition
    due_date: Option<DateTime<Utc>>,
    retries: i32,
    /// Failed executions so far, drives the retry backoff
    #[serde(default)]
    attempts: i32,
    lock_owner: Option<String>,
    lock_expiration_time: Option<DateTime<Utc>>,
    /// `None` means the job belongs to no tenant
    tenant_id: Option<String>,
    category: Option<String>,
    exception_message: Option<String>,
    exception_stacktrace: Option<String>,
    /// Optimistic locking version, bumped by every update
    revision: i32,
    create_time: DateTime<Utc>,
}

impl Job {
    /// Creates a fresh, unlocked row from a scheduling request.
    pub fn from_new_job(
        new_job: NewJob,
        job_type: JobType,
        now: DateTime<Utc>,
        default_retries: i32,
    ) -> Job {
        let NewJob {
            handler_type,
            handler_configuration,
            custom_values,
            due_date,
            retries,
            tenant_id,
            category,
            correlation_id,
        } = new_job;

        Job {
            id: Uuid::now_v7(),
            correlation_id: correlation_id.unwrap_or_else(Uuid::now_v7),
            job_type,
            handler_type,
            handler_configuration,
            custom_values,
            due_date,
            retries: retries.unwrap_or(default_retries),
            attempts: 0,
            lock_owner: None,
            lock_expiration_time: None,
            tenant_id: tenant_id.filter(|t| !t.is_empty()),
            category,
            exception_message: None,
            exception_stacktrace: None,
            revision: 1,
            create_time: now,
        }
    }

    /// Copy of this job for insertion into another table: new row id, same correlation id,
    /// fresh revision.
    pub fn moved(&self) -> Job {
        Job {
            id: Uuid::now_v7(),
            revision: 1,
            ..self.clone()
        }
    }

    pub fn lock(&mut self, owner: impl Into<String>, expiration: DateTime<Utc>) {
        self.lock_owner = Some(owner.into());
        self.lock_expiration_time = Some(expiration);
    }

    pub fn unlock(&mut self) {
        self.lock_owner = None;
        self.lock_expiration_time = None;
    }

    pub fn is_locked(&self) -> bool {
        self.lock_owner.is_some()
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.lock_owner.as_deref() == Some(owner)
    }

    pub fn is_lock_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.lock_expiration_time, Some(expiration) if expiration < now)
    }

    /// Unlocked, or locked by a lock that has already expired.
    pub fn is_acquirable_lock(&self, now: DateTime<Utc>) -> bool {
        self.lock_owner.is_none() || self.is_lock_expired(now)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_date.map_or(true, |due| due <= now)
    }

    pub fn set_due_date(&mut self, due_date: Option<DateTime<Utc>>) {
        self.due_date = due_date;
    }

    pub fn set_retries(&mut self, retries: i32) {
        self.retries = retries;
    }

    pub fn set_attempts(&mut self, attempts: i32) {
        self.attempts = attempts;
    }

    pub fn set_custom_values(&mut self, custom_values: Option<String>) {
        self.custom_values = custom_values;
    }

    pub fn set_exception(&mut self, message: Option<String>, stacktrace: Option<String>) {
        self.exception_message = message;
        self.exception_stacktrace = stacktrace;
    }

    /// Called by stores once an update has been persisted.
    pub fn bump_revision(&mut self) {
        self.revision += 1;
    }
}

impl<'r> FromRow<'r, PgRow> for Job {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let job_type: String = row.try_get("job_type")?;
        let job_type = job_type.parse().map_err(|e| sqlx::Error::ColumnDecode {
            index: "job_type".into(),
            source: Box::new(e),
        })?;

        Ok(Job {
            id: row.try_get("id")?,
            correlation_id: row.try_get("correlation_id")?,
            job_type,
            handler_type: row.try_get("handler_type")?,
            handler_configuration: row.try_get("handler_configuration")?,
            custom_values: row.try_get("custom_values")?,
            due_date: row.try_get("due_date")?,
            retries: row.try_get("retries")?,
            attempts: row.try_get("attempts")?,
            lock_owner: row.try_get("lock_owner")?,
            lock_expiration_time: row.try_get("lock_expiration_time")?,
            tenant_id: row.try_get("tenant_id")?,
            category: row.try_get("category")?,
            exception_message: row.try_get("exception_message")?,
            exception_stacktrace: row.try_get("exception_stacktrace")?,
            revision: row.try_get("revision")?,
            create_time: row.try_get("create_time")?,
        })
    }
}
