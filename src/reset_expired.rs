use job_executor_job::JobTable;
use job_executor_lifecycle_hooks::ExpiredLocksResetContext;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::Result;
use crate::job_manager::JobManager;
use crate::store::JobStore;

/// Frees jobs whose lock expired, e.g. because their node crashed.
///
/// Only the lock expiration decides: a job whose lock is still live is never touched.
pub struct ResetExpiredJobsRunnable<S: JobStore> {
    job_manager: JobManager<S>,
    stop: CancellationToken,
}

impl<S: JobStore> ResetExpiredJobsRunnable<S> {
    pub fn new(job_manager: JobManager<S>) -> Self {
        Self::with_stop_token(job_manager, CancellationToken::new())
    }

    pub(crate) fn with_stop_token(job_manager: JobManager<S>, stop: CancellationToken) -> Self {
        Self { job_manager, stop }
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub async fn run(&self) {
        let interval = self.job_manager.config().reset_expired_jobs_interval;
        info!(?interval, "Starting expired lock reset");
        while !self.stop.is_cancelled() {
            if let Err(e) = self.reset_expired_jobs().await {
                error!(error = %e, "Resetting expired jobs failed");
            }
            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("Stopped expired lock reset");
    }

    /// Drains every lockable table of expired locks, page by page. Returns the number of
    /// jobs freed.
    pub async fn reset_expired_jobs(&self) -> Result<usize> {
        let page_size = self.job_manager.config().reset_expired_jobs_page_size;
        let mut total = 0;

        for table in JobTable::LOCKABLE {
            let mut reset_count = 0;
            loop {
                let (found, reset) = self.job_manager.reset_expired_page(table, page_size).await?;
                reset_count += reset;
                if found < page_size || reset == 0 {
                    break;
                }
            }

            if reset_count > 0 {
                debug!(%table, reset_count, "Reset expired job locks");
                self.job_manager
                    .hooks
                    .emit(ExpiredLocksResetContext { table, reset_count })
                    .await;
            }
            total += reset_count;
        }

        Ok(total)
    }
}
