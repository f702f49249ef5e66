use indoc::formatdoc;
use job_executor_job::{Job, JobTable};
use sqlx::{query, PgExecutor};

use super::qualified;
use crate::errors::Result;

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", %table, job_id = %job.id()))]
pub async fn insert_job<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table: JobTable,
    job: &Job,
) -> Result<()> {
    let table_name = qualified(escaped_schema, table);
    let sql = formatdoc!(
        r#"
            insert into {table_name} (
                id, correlation_id, job_type, handler_type, handler_configuration,
                custom_values, due_date, retries, lock_owner, lock_expiration_time,
                tenant_id, category, exception_message, exception_stacktrace,
                revision, create_time, attempts
            )
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#
    );

    query(&sql)
        .bind(job.id())
        .bind(job.correlation_id())
        .bind(job.job_type().as_str())
        .bind(job.handler_type())
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
        .bind(job.revision())
        .bind(job.create_time())
        .bind(job.attempts())
        .execute(executor)
        .await?;

    Ok(())
}
