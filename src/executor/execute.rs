use std::sync::Arc;

use job_executor_job::{Job, JobTable};
use tracing::{debug, error};

use crate::job_manager::JobManager;
use crate::observation::JobExecutionObservationProvider;
use crate::store::JobStore;

/// Body of one pool task: confirm the lock, run the handler, persist the outcome.
pub(crate) async fn run_locked_job<S: JobStore>(
    job_manager: JobManager<S>,
    observation: Arc<dyn JobExecutionObservationProvider>,
    table: JobTable,
    job: Job,
) {
    let observation = observation.create(&job);
    observation.start();

    let confirmed = {
        let _lock_scope = observation.lock_scope();
        match job_manager.confirm_lock(table, &job).await {
            Ok(confirmed) => confirmed,
            Err(e) => {
                observation.lock_error(&e);
                error!(job_id = %job.id(), %table, error = %e, "Could not confirm job lock");
                None
            }
        }
    };

    let Some(job) = confirmed else {
        debug!(job_id = %job.id(), %table, "Lock no longer held, skipping execution");
        observation.stop();
        return;
    };

    {
        let _execution_scope = observation.execution_scope();
        match job_manager.execute(table, job).await {
            Ok(outcome) => {
                if let Some(handler_error) = outcome.handler_error() {
                    observation.execution_error(handler_error);
                }
            }
            Err(e) if e.is_optimistic_locking() => {
                observation.execution_error(&e);
                debug!(error = %e, "Job outcome lost an optimistic locking race");
            }
            Err(e) => {
                observation.execution_error(&e);
                error!(error = %e, "Could not record job outcome");
            }
        }
    }

    observation.stop();
}
