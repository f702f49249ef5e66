use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use job_executor_job::{Job, JobTable};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;
use uuid::Uuid;

use super::{DueFilter, JobQuery, JobStore, JobStoreTx, LockUpdate, TenantScope};
use crate::errors::{JobExecutorError, Result};

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<JobTable, HashMap<Uuid, Job>>,
}

impl Tables {
    fn table(&self, table: JobTable) -> impl Iterator<Item = &Job> {
        self.rows.get(&table).into_iter().flat_map(|rows| rows.values())
    }

    fn table_mut(&mut self, table: JobTable) -> &mut HashMap<Uuid, Job> {
        self.rows.entry(table).or_default()
    }
}

/// Job tables held in process memory.
///
/// Clones share the same tables, so two clones behave like two nodes on one database.
/// A transaction holds the tables exclusively until it commits or is dropped.
#[derive(Debug, Clone)]
pub struct MemoryJobStore {
    tables: Arc<Mutex<Tables>>,
    max_in_clause_size: usize,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_max_in_clause_size(1000)
    }

    pub fn with_max_in_clause_size(max_in_clause_size: usize) -> Self {
        Self {
            tables: Arc::default(),
            max_in_clause_size,
        }
    }

    /// Committed rows of `table`, oldest first.
    pub async fn snapshot(&self, table: JobTable) -> Vec<Job> {
        let tables = self.tables.lock().await;
        let mut jobs: Vec<Job> = tables.table(table).cloned().collect();
        jobs.sort_by_key(|job| (*job.create_time(), *job.id()));
        jobs
    }
}

impl JobStore for MemoryJobStore {
    type Tx = MemoryJobStoreTx;

    async fn begin(&self) -> Result<MemoryJobStoreTx> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemoryJobStoreTx {
            guard,
            working,
            max_in_clause_size: self.max_in_clause_size,
        })
    }

    fn max_in_clause_size(&self) -> usize {
        self.max_in_clause_size
    }
}

pub struct MemoryJobStoreTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    max_in_clause_size: usize,
}

impl MemoryJobStoreTx {
    fn check_clause(&self, ids: &[Uuid]) -> Result<()> {
        if ids.len() > self.max_in_clause_size {
            return Err(JobExecutorError::ClauseTooLarge {
                size: ids.len(),
                max: self.max_in_clause_size,
            });
        }
        Ok(())
    }

    fn current(&mut self, table: JobTable, job: &Job) -> Result<&mut Job> {
        match self.working.table_mut(table).get_mut(job.id()) {
            Some(current) if current.revision() == job.revision() => Ok(current),
            _ => Err(JobExecutorError::OptimisticLocking {
                table,
                job_id: *job.id(),
            }),
        }
    }
}

fn due_order(a: &Job, b: &Job) -> Ordering {
    // Null due dates sort first, they are due immediately.
    a.due_date()
        .cmp(b.due_date())
        .then_with(|| a.create_time().cmp(b.create_time()))
        .then_with(|| a.id().cmp(b.id()))
}

impl JobStoreTx for MemoryJobStoreTx {
    async fn insert(&mut self, table: JobTable, job: &Job) -> Result<()> {
        let rows = self.working.table_mut(table);
        if rows.contains_key(job.id()) {
            return Err(JobExecutorError::InvalidJob(format!(
                "job {} already exists in the {table} table",
                job.id()
            )));
        }
        rows.insert(*job.id(), job.clone());
        Ok(())
    }

    async fn find_by_id(&mut self, table: JobTable, id: Uuid) -> Result<Option<Job>> {
        Ok(self.working.table_mut(table).get(&id).cloned())
    }

    async fn find_by_ids(&mut self, table: JobTable, ids: &[Uuid]) -> Result<Vec<Job>> {
        self.check_clause(ids)?;
        let rows = self.working.table_mut(table);
        Ok(ids.iter().filter_map(|id| rows.get(id).cloned()).collect())
    }

    async fn update(&mut self, table: JobTable, job: &Job) -> Result<Job> {
        let current = self.current(table, job)?;
        let mut updated = job.clone();
        updated.bump_revision();
        *current = updated.clone();
        Ok(updated)
    }

    async fn delete(&mut self, table: JobTable, job: &Job) -> Result<()> {
        self.current(table, job)?;
        self.working.table_mut(table).remove(job.id());
        Ok(())
    }

    async fn find_due(
        &mut self,
        table: JobTable,
        now: DateTime<Utc>,
        limit: usize,
        filter: &DueFilter,
    ) -> Result<Vec<Job>> {
        let mut due: Vec<Job> = self
            .working
            .table(table)
            .filter(|job| job.is_due(now) && job.is_acquirable_lock(now) && filter.matches(job))
            .cloned()
            .collect();
        due.sort_by(due_order);
        due.truncate(limit);
        Ok(due)
    }

    async fn lock_with_version_check(
        &mut self,
        table: JobTable,
        job: &Job,
        owner: &str,
        expiration: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let current = match self.current(table, job) {
            Ok(current) => current,
            Err(JobExecutorError::OptimisticLocking { .. }) => {
                trace!(job_id = %job.id(), %table, "Row changed before it could be locked");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        current.lock(owner, expiration);
        current.bump_revision();
        Ok(Some(current.clone()))
    }

    async fn bulk_update_lock(
        &mut self,
        table: JobTable,
        ids: &[Uuid],
        update: LockUpdate<'_>,
    ) -> Result<u64> {
        self.check_clause(ids)?;
        let rows = self.working.table_mut(table);
        let mut updated = 0;
        for id in ids {
            let Some(job) = rows.get_mut(id).filter(|job| update.applies_to(job)) else {
                continue;
            };
            match update {
                LockUpdate::Acquire {
                    owner, expiration, ..
                } => job.lock(owner, expiration),
                LockUpdate::Release { .. } => job.unlock(),
            }
            job.bump_revision();
            updated += 1;
        }
        Ok(updated)
    }

    async fn bulk_delete(&mut self, table: JobTable, ids: &[Uuid]) -> Result<u64> {
        self.check_clause(ids)?;
        let rows = self.working.table_mut(table);
        Ok(ids.iter().filter(|id| rows.remove(*id).is_some()).count() as u64)
    }

    async fn find_expired_locks(
        &mut self,
        table: JobTable,
        now: DateTime<Utc>,
        page_size: usize,
    ) -> Result<Vec<Job>> {
        let mut expired: Vec<Job> = self
            .working
            .table(table)
            .filter(|job| job.is_lock_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|job| (*job.lock_expiration_time(), *job.id()));
        expired.truncate(page_size);
        Ok(expired)
    }

    async fn reset_expired_lock(&mut self, table: JobTable, job: &Job) -> Result<bool> {
        let Some(current) = self.working.table_mut(table).get_mut(job.id()) else {
            return Ok(false);
        };
        if current.lock_owner() != job.lock_owner()
            || current.lock_expiration_time() != job.lock_expiration_time()
        {
            return Ok(false);
        }
        current.unlock();
        current.bump_revision();
        Ok(true)
    }

    async fn unlock_owned(
        &mut self,
        table: JobTable,
        owner: &str,
        tenant: &TenantScope,
    ) -> Result<u64> {
        let mut released = 0;
        for job in self.working.table_mut(table).values_mut() {
            if job.is_owned_by(owner) && tenant.matches(job.tenant_id().as_deref()) {
                job.unlock();
                job.bump_revision();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn find(&mut self, table: JobTable, query: &JobQuery) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .working
            .table(table)
            .filter(|job| query.matches(job))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (*job.create_time(), *job.id()));
        Ok(jobs)
    }

    async fn count(&mut self, table: JobTable, query: &JobQuery) -> Result<u64> {
        Ok(self.working.table(table).filter(|job| query.matches(job)).count() as u64)
    }

    async fn commit(self) -> Result<()> {
        let MemoryJobStoreTx {
            mut guard, working, ..
        } = self;
        *guard = working;
        Ok(())
    }
}
