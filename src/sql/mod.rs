//! Query functions behind [`crate::store::PgJobStore`].

use job_executor_job::JobTable;

pub mod bulk;
pub mod find_jobs;
pub mod insert_job;
pub mod job_query_helpers;
pub mod lock_job;
pub mod update_job;

/// Fully qualified, already escaped table name.
pub(crate) fn qualified(escaped_schema: &str, table: JobTable) -> String {
    format!("{escaped_schema}.{}", table.table_name())
}
