use indoc::formatdoc;
use job_executor_job::{Job, JobTable};
use sqlx::{query, query_as, PgExecutor};

use super::qualified;
use crate::errors::{JobExecutorError, Result};

/// Writes every mutable column of `job` if the stored revision still matches.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", %table, job_id = %job.id()))]
pub async fn update_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table: JobTable,
    job: &Job,
) -> Result<Job> {
    let table_name = qualified(escaped_schema, table);
    let sql = formatdoc!(
        r#"
            update {table_name}
                set
                    handler_configuration = $3,
                    custom_values = $4,
                    due_date = $5,
                    retries = $6,
                    lock_owner = $7,
                    lock_expiration_time = $8,
                    tenant_id = $9,
                    category = $10,
                    exception_message = $11,
                    exception_stacktrace = $12,
                    attempts = $13,
                    revision = revision + 1
                where id = $1 and revision = $2
                returning *
        "#
    );

    query_as::<_, Job>(&sql)
        .bind(job.id())
        .bind(job.revision())
        .bind(job.handler_configuration())
        .bind(job.custom_values())
        .bind(job.due_date())
        .bind(job.retries())
        .bind(job.lock_owner())
        .bind(job.lock_expiration_time())
        .bind(job.tenant_id())
        .bind(job.category())
        .bind(job.exception_message())
        .bind(job.exception_stacktrace())
        .bind(job.attempts())
        .fetch_optional(executor)
        .await?
        .ok_or(JobExecutorError::OptimisticLocking {
            table,
            job_id: *job.id(),
        })
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", %table, job_id = %job.id()))]
pub async fn delete_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table: JobTable,
    job: &Job,
) -> Result<()> {
    let table_name = qualified(escaped_schema, table);
    let sql = format!("delete from {table_name} where id = $1 and revision = $2");

    let deleted = query(&sql)
        .bind(job.id())
        .bind(job.revision())
        .execute(executor)
        .await?
        .rows_affected();

    if deleted == 0 {
        return Err(JobExecutorError::OptimisticLocking {
            table,
            job_id: *job.id(),
        });
    }
    Ok(())
}
