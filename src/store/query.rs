use chrono::{DateTime, Utc};
use job_executor_job::Job;
use uuid::Uuid;

use super::TenantScope;

/// One set of conditions, all of which must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobCriteria {
    pub id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub handler_type: Option<String>,
    pub tenant: TenantScope,
    /// `Some(true)` only locked jobs, `Some(false)` only unlocked ones
    pub locked: Option<bool>,
    /// Jobs with a due date strictly before this instant
    pub due_before: Option<DateTime<Utc>>,
    pub with_exception: Option<bool>,
    pub category: Option<String>,
}

impl JobCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn handler_type(mut self, handler_type: impl Into<String>) -> Self {
        self.handler_type = Some(handler_type.into());
        self
    }

    pub fn tenant(mut self, tenant: TenantScope) -> Self {
        self.tenant = tenant;
        self
    }

    pub fn locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }

    pub fn due_before(mut self, instant: DateTime<Utc>) -> Self {
        self.due_before = Some(instant);
        self
    }

    pub fn with_exception(mut self, with_exception: bool) -> Self {
        self.with_exception = Some(with_exception);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.id.map_or(true, |id| job.id() == &id)
            && self
                .correlation_id
                .map_or(true, |id| job.correlation_id() == &id)
            && self
                .handler_type
                .as_ref()
                .map_or(true, |h| job.handler_type() == h)
            && self.tenant.matches(job.tenant_id().as_deref())
            && self.locked.map_or(true, |locked| job.is_locked() == locked)
            && self
                .due_before
                .map_or(true, |before| matches!(job.due_date(), Some(due) if *due < before))
            && self
                .with_exception
                .map_or(true, |w| job.exception_message().is_some() == w)
            && self
                .category
                .as_ref()
                .map_or(true, |c| job.category().as_ref() == Some(c))
    }
}

/// Criteria plus a group of alternatives.
///
/// A job matches when it satisfies `criteria` and, if `or` is not empty, at least one of
/// the alternatives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobQuery {
    pub criteria: JobCriteria,
    pub or: Vec<JobCriteria>,
}

impl JobQuery {
    /// Matches every job.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(criteria: JobCriteria) -> Self {
        Self {
            criteria,
            or: Vec::new(),
        }
    }

    pub fn or(mut self, alternative: JobCriteria) -> Self {
        self.or.push(alternative);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.criteria.matches(job) && (self.or.is_empty() || self.or.iter().any(|c| c.matches(job)))
    }
}

impl From<JobCriteria> for JobQuery {
    fn from(criteria: JobCriteria) -> Self {
        JobQuery::new(criteria)
    }
}
