use std::sync::Arc;

use chrono::{DateTime, Utc};
use job_executor_job::{Job, JobTable};
use job_executor_migrations::migrate;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use super::{DueFilter, JobQuery, JobStore, JobStoreTx, LockUpdate, TenantScope};
use crate::errors::{JobExecutorError, Result};
use crate::sql::bulk::{bulk_acquire_lock, bulk_delete, bulk_release_lock};
use crate::sql::find_jobs::{
    count_jobs, escape_identifier, find_due_jobs, find_expired_locks, find_job_by_id,
    find_jobs, find_jobs_by_ids,
};
use crate::sql::insert_job::insert_job;
use crate::sql::lock_job::{lock_job_with_version_check, reset_expired_lock, unlock_owned_jobs};
use crate::sql::update_job::{delete_job, update_job};

/// Job tables in a PostgreSQL schema.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
    escaped_schema: Arc<str>,
    max_in_clause_size: usize,
}

impl PgJobStore {
    /// Binds to `schema` on `pool`. Call [`PgJobStore::migrate`] before first use.
    pub async fn new(pool: PgPool, schema: &str, max_in_clause_size: usize) -> Result<Self> {
        let escaped_schema = escape_identifier(&pool, schema).await?;
        Ok(Self {
            pool,
            escaped_schema: escaped_schema.into(),
            max_in_clause_size,
        })
    }

    pub async fn migrate(&self) -> Result<()> {
        info!(schema = %self.escaped_schema, "Migrating job tables");
        migrate(&self.pool, &self.escaped_schema).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn escaped_schema(&self) -> &str {
        &self.escaped_schema
    }
}

impl JobStore for PgJobStore {
    type Tx = PgJobStoreTx;

    async fn begin(&self) -> Result<PgJobStoreTx> {
        Ok(PgJobStoreTx {
            tx: self.pool.begin().await?,
            escaped_schema: self.escaped_schema.clone(),
            max_in_clause_size: self.max_in_clause_size,
        })
    }

    fn max_in_clause_size(&self) -> usize {
        self.max_in_clause_size
    }
}

pub struct PgJobStoreTx {
    tx: Transaction<'static, Postgres>,
    escaped_schema: Arc<str>,
    max_in_clause_size: usize,
}

impl PgJobStoreTx {
    fn check_clause(&self, ids: &[Uuid]) -> Result<()> {
        if ids.len() > self.max_in_clause_size {
            return Err(JobExecutorError::ClauseTooLarge {
                size: ids.len(),
                max: self.max_in_clause_size,
            });
        }
        Ok(())
    }
}

impl JobStoreTx for PgJobStoreTx {
    async fn insert(&mut self, table: JobTable, job: &Job) -> Result<()> {
        insert_job(self.tx.as_mut(), &self.escaped_schema, table, job).await
    }

    async fn find_by_id(&mut self, table: JobTable, id: Uuid) -> Result<Option<Job>> {
        find_job_by_id(self.tx.as_mut(), &self.escaped_schema, table, id).await
    }

    async fn find_by_ids(&mut self, table: JobTable, ids: &[Uuid]) -> Result<Vec<Job>> {
        self.check_clause(ids)?;
        find_jobs_by_ids(self.tx.as_mut(), &self.escaped_schema, table, ids).await
    }

    async fn update(&mut self, table: JobTable, job: &Job) -> Result<Job> {
        update_job(self.tx.as_mut(), &self.escaped_schema, table, job).await
    }

    async fn delete(&mut self, table: JobTable, job: &Job) -> Result<()> {
        delete_job(self.tx.as_mut(), &self.escaped_schema, table, job).await
    }

    async fn find_due(
        &mut self,
        table: JobTable,
        now: DateTime<Utc>,
        limit: usize,
        filter: &DueFilter,
    ) -> Result<Vec<Job>> {
        find_due_jobs(self.tx.as_mut(), &self.escaped_schema, table, now, limit, filter).await
    }

    async fn lock_with_version_check(
        &mut self,
        table: JobTable,
        job: &Job,
        owner: &str,
        expiration: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        lock_job_with_version_check(
            self.tx.as_mut(),
            &self.escaped_schema,
            table,
            job,
            owner,
            expiration,
        )
        .await
    }

    async fn bulk_update_lock(
        &mut self,
        table: JobTable,
        ids: &[Uuid],
        update: LockUpdate<'_>,
    ) -> Result<u64> {
        self.check_clause(ids)?;
        match update {
            LockUpdate::Acquire {
                owner,
                now,
                expiration,
            } => {
                bulk_acquire_lock(
                    self.tx.as_mut(),
                    &self.escaped_schema,
                    table,
                    ids,
                    owner,
                    now,
                    expiration,
                )
                .await
            }
            LockUpdate::Release { owner } => {
                bulk_release_lock(self.tx.as_mut(), &self.escaped_schema, table, ids, owner)
                    .await
            }
        }
    }

    async fn bulk_delete(&mut self, table: JobTable, ids: &[Uuid]) -> Result<u64> {
        self.check_clause(ids)?;
        bulk_delete(self.tx.as_mut(), &self.escaped_schema, table, ids).await
    }

    async fn find_expired_locks(
        &mut self,
        table: JobTable,
        now: DateTime<Utc>,
        page_size: usize,
    ) -> Result<Vec<Job>> {
        find_expired_locks(self.tx.as_mut(), &self.escaped_schema, table, now, page_size).await
    }

    async fn reset_expired_lock(&mut self, table: JobTable, job: &Job) -> Result<bool> {
        reset_expired_lock(self.tx.as_mut(), &self.escaped_schema, table, job).await
    }

    async fn unlock_owned(
        &mut self,
        table: JobTable,
        owner: &str,
        tenant: &TenantScope,
    ) -> Result<u64> {
        unlock_owned_jobs(self.tx.as_mut(), &self.escaped_schema, table, owner, tenant).await
    }

    async fn find(&mut self, table: JobTable, query: &JobQuery) -> Result<Vec<Job>> {
        find_jobs(self.tx.as_mut(), &self.escaped_schema, table, query).await
    }

    async fn count(&mut self, table: JobTable, query: &JobQuery) -> Result<u64> {
        count_jobs(self.tx.as_mut(), &self.escaped_schema, table, query).await
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
