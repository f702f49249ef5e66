//! Persistence boundary for the four job tables.
//!
//! All access goes through a [`JobStoreTx`] opened with [`JobStore::begin`]. Nothing is
//! visible to other nodes until [`JobStoreTx::commit`]; dropping a transaction discards
//! its changes.

use std::future::Future;

use chrono::{DateTime, Utc};
use job_executor_job::{Job, JobTable};
use uuid::Uuid;

use crate::errors::Result;

mod memory;
mod postgres;
mod query;

pub use memory::MemoryJobStore;
pub use postgres::{PgJobStore, PgJobStoreTx};
pub use query::{JobCriteria, JobQuery};

/// Which tenants an operation applies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum TenantScope {
    /// Every job regardless of tenant
    #[default]
    All,
    /// Only jobs without a tenant
    NoTenant,
    Tenant(String),
}

impl TenantScope {
    /// `None` means all tenants, an empty string means jobs without a tenant.
    pub fn from_tenant_arg(tenant: Option<&str>) -> Self {
        match tenant {
            None => TenantScope::All,
            Some("") => TenantScope::NoTenant,
            Some(tenant) => TenantScope::Tenant(tenant.to_string()),
        }
    }

    pub fn matches(&self, tenant_id: Option<&str>) -> bool {
        match self {
            TenantScope::All => true,
            TenantScope::NoTenant => tenant_id.is_none(),
            TenantScope::Tenant(tenant) => tenant_id == Some(tenant.as_str()),
        }
    }
}

/// Restricts acquisition to the categories and tenants a node is responsible for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueFilter {
    /// Empty acquires every category. Jobs without a category are always eligible.
    pub categories: Vec<String>,
    pub tenant: TenantScope,
}

impl DueFilter {
    pub fn matches(&self, job: &Job) -> bool {
        let category_enabled = match job.category() {
            None => true,
            Some(category) => {
                self.categories.is_empty() || self.categories.iter().any(|c| c == category)
            }
        };
        category_enabled && self.tenant.matches(job.tenant_id().as_deref())
    }
}

/// A guarded change to row locks. Rows another node holds a live lock on are left alone.
#[derive(Debug, Clone, Copy)]
pub enum LockUpdate<'a> {
    /// Locks rows that are free, whose lock expired before `now`, or that `owner` already holds.
    Acquire {
        owner: &'a str,
        now: DateTime<Utc>,
        expiration: DateTime<Utc>,
    },
    /// Clears the lock on rows held by `owner`.
    Release { owner: &'a str },
}

impl LockUpdate<'_> {
    pub fn applies_to(&self, job: &Job) -> bool {
        match *self {
            LockUpdate::Acquire { owner, now, .. } => {
                job.is_acquirable_lock(now) || job.is_owned_by(owner)
            }
            LockUpdate::Release { owner } => job.is_owned_by(owner),
        }
    }
}

/// A handle on the shared job tables. Cloned handles address the same storage.
pub trait JobStore: Clone + Send + Sync + 'static {
    type Tx: JobStoreTx;

    /// Opens a unit of work.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx>> + Send;

    /// Largest number of ids a single bulk call accepts.
    fn max_in_clause_size(&self) -> usize;
}

/// One unit of work against the job tables.
///
/// Updates and deletes are guarded by the row's `revision`; when it no longer matches
/// they fail with [`crate::JobExecutorError::OptimisticLocking`] and leave the row alone.
pub trait JobStoreTx: Send {
    fn insert(&mut self, table: JobTable, job: &Job) -> impl Future<Output = Result<()>> + Send;

    fn find_by_id(
        &mut self,
        table: JobTable,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Job>>> + Send;

    /// Rows for the given ids; at most `max_in_clause_size` ids per call.
    fn find_by_ids(
        &mut self,
        table: JobTable,
        ids: &[Uuid],
    ) -> impl Future<Output = Result<Vec<Job>>> + Send;

    /// Persists `job` and returns it with its revision bumped.
    fn update(&mut self, table: JobTable, job: &Job) -> impl Future<Output = Result<Job>> + Send;

    fn delete(&mut self, table: JobTable, job: &Job) -> impl Future<Output = Result<()>> + Send;

    /// Up to `limit` rows that are due and not held by a live lock, oldest due date first.
    fn find_due(
        &mut self,
        table: JobTable,
        now: DateTime<Utc>,
        limit: usize,
        filter: &DueFilter,
    ) -> impl Future<Output = Result<Vec<Job>>> + Send;

    /// Locks `job` if its revision is unchanged. `None` means another node got there first.
    fn lock_with_version_check(
        &mut self,
        table: JobTable,
        job: &Job,
        owner: &str,
        expiration: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Job>>> + Send;

    /// Applies `update` to the listed rows it is allowed to touch and returns how many
    /// changed; at most `max_in_clause_size` ids.
    fn bulk_update_lock(
        &mut self,
        table: JobTable,
        ids: &[Uuid],
        update: LockUpdate<'_>,
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Deletes every listed row; at most `max_in_clause_size` ids.
    fn bulk_delete(
        &mut self,
        table: JobTable,
        ids: &[Uuid],
    ) -> impl Future<Output = Result<u64>> + Send;

    /// Up to `page_size` rows whose lock expired before `now`.
    fn find_expired_locks(
        &mut self,
        table: JobTable,
        now: DateTime<Utc>,
        page_size: usize,
    ) -> impl Future<Output = Result<Vec<Job>>> + Send;

    /// Clears the lock of `job` only if the row still carries the same owner and expiration.
    fn reset_expired_lock(
        &mut self,
        table: JobTable,
        job: &Job,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Clears every lock held by `owner` within `tenant`.
    fn unlock_owned(
        &mut self,
        table: JobTable,
        owner: &str,
        tenant: &TenantScope,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn find(
        &mut self,
        table: JobTable,
        query: &JobQuery,
    ) -> impl Future<Output = Result<Vec<Job>>> + Send;

    fn count(
        &mut self,
        table: JobTable,
        query: &JobQuery,
    ) -> impl Future<Output = Result<u64>> + Send;

    fn commit(self) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_executor_job::{JobType, NewJob};

    #[test]
    fn tenant_argument_mapping() {
        assert_eq!(TenantScope::from_tenant_arg(None), TenantScope::All);
        assert_eq!(TenantScope::from_tenant_arg(Some("")), TenantScope::NoTenant);
        assert_eq!(
            TenantScope::from_tenant_arg(Some("acme")),
            TenantScope::Tenant("acme".into())
        );

        assert!(TenantScope::NoTenant.matches(None));
        assert!(!TenantScope::NoTenant.matches(Some("acme")));
        assert!(TenantScope::Tenant("acme".into()).matches(Some("acme")));
        assert!(!TenantScope::Tenant("acme".into()).matches(None));
    }

    #[test]
    fn uncategorized_jobs_are_always_eligible() {
        let filter = DueFilter {
            categories: vec!["billing".into()],
            tenant: TenantScope::All,
        };
        let now = Utc::now();
        let plain = Job::from_new_job(NewJob::new("a"), JobType::Message, now, 3);
        let billing = Job::from_new_job(
            NewJob::builder().handler_type("a").category("billing").build(),
            JobType::Message,
            now,
            3,
        );
        let reports = Job::from_new_job(
            NewJob::builder().handler_type("a").category("reports").build(),
            JobType::Message,
            now,
            3,
        );

        assert!(filter.matches(&plain));
        assert!(filter.matches(&billing));
        assert!(!filter.matches(&reports));
        assert!(DueFilter::default().matches(&reports));
    }
}
