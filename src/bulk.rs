//! Bulk operations, split into store calls of at most `max_in_clause_size` ids.
//!
//! Every operation runs all of its chunks inside one unit of work, so the end state is
//! the same as a single unbounded call.

use std::time::Duration;

use job_executor_job::{Job, JobTable};
use tracing::debug;
use uuid::Uuid;

use crate::config::ConfigError;
use crate::errors::Result;
use crate::job_manager::{after, revived, JobManager};
use crate::store::{JobStore, JobStoreTx, LockUpdate};

fn chunks<'a>(ids: &'a [Uuid], size: usize) -> Result<std::slice::Chunks<'a, Uuid>> {
    if size == 0 {
        return Err(ConfigError::MustBePositive("maxInClauseSize").into());
    }
    Ok(ids.chunks(size))
}

impl<S: JobStore> JobManager<S> {
    /// Locks the listed rows for this node for `lock_time`. Rows another node holds a
    /// live lock on are skipped, so the count may be lower than `ids.len()`.
    pub async fn bulk_lock_jobs(
        &self,
        table: JobTable,
        ids: &[Uuid],
        lock_time: Duration,
    ) -> Result<u64> {
        let now = self.now();
        let update = LockUpdate::Acquire {
            owner: &*self.lock_owner,
            now,
            expiration: after(now, lock_time),
        };
        let mut tx = self.store.begin().await?;
        let mut locked = 0;
        for chunk in chunks(ids, self.store.max_in_clause_size())? {
            locked += tx.bulk_update_lock(table, chunk, update).await?;
        }
        tx.commit().await?;
        debug!(%table, requested = ids.len(), locked, "Bulk locked jobs");
        Ok(locked)
    }

    /// Releases the listed rows this node holds.
    pub async fn bulk_unlock_jobs(&self, table: JobTable, ids: &[Uuid]) -> Result<u64> {
        let update = LockUpdate::Release {
            owner: &*self.lock_owner,
        };
        let mut tx = self.store.begin().await?;
        let mut unlocked = 0;
        for chunk in chunks(ids, self.store.max_in_clause_size())? {
            unlocked += tx.bulk_update_lock(table, chunk, update).await?;
        }
        tx.commit().await?;
        Ok(unlocked)
    }

    pub async fn bulk_delete(&self, table: JobTable, ids: &[Uuid]) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let mut deleted = 0;
        for chunk in chunks(ids, self.store.max_in_clause_size())? {
            deleted += tx.bulk_delete(table, chunk).await?;
        }
        tx.commit().await?;
        debug!(%table, requested = ids.len(), deleted, "Bulk deleted jobs");
        Ok(deleted)
    }

    /// Promotes the listed timers regardless of their due date. Unknown ids are ignored.
    pub async fn bulk_move_timers_to_executable(&self, ids: &[Uuid]) -> Result<Vec<Job>> {
        self.bulk_move(JobTable::Timer, ids, |timer| {
            let mut job = timer.moved();
            job.unlock();
            job
        })
        .await
    }

    /// Moves the listed dead-letter jobs back to the executable table with `retries`.
    pub async fn bulk_move_dead_letter_jobs_to_executable(
        &self,
        ids: &[Uuid],
        retries: i32,
    ) -> Result<Vec<Job>> {
        self.bulk_move(JobTable::DeadLetter, ids, |dead| revived(dead, retries))
            .await
    }

    async fn bulk_move(
        &self,
        from: JobTable,
        ids: &[Uuid],
        convert: impl Fn(&Job) -> Job + Send + Sync,
    ) -> Result<Vec<Job>> {
        let mut tx = self.store.begin().await?;
        let mut moved = Vec::with_capacity(ids.len());
        for chunk in chunks(ids, self.store.max_in_clause_size())? {
            let sources = tx.find_by_ids(from, chunk).await?;
            let source_ids: Vec<Uuid> = sources.iter().map(|job| *job.id()).collect();
            for source in &sources {
                let job = convert(source);
                tx.insert(JobTable::Executable, &job).await?;
                moved.push(job);
            }
            tx.bulk_delete(from, &source_ids).await?;
        }
        tx.commit().await?;
        debug!(%from, requested = ids.len(), moved = moved.len(), "Bulk moved jobs to executable");
        Ok(moved)
    }
}
