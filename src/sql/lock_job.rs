use chrono::{DateTime, Utc};
use indoc::formatdoc;
use job_executor_job::{Job, JobTable};
use sqlx::{query, query_as, PgExecutor};

use super::job_query_helpers::tenant_clause;
use super::qualified;
use crate::errors::Result;
use crate::store::TenantScope;

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", %table, job_id = %job.id()))]
pub async fn lock_job_with_version_check<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table: JobTable,
    job: &Job,
    owner: &str,
    expiration: DateTime<Utc>,
) -> Result<Option<Job>> {
    let table_name = qualified(escaped_schema, table);
    let sql = formatdoc!(
        r#"
            update {table_name}
                set
                    lock_owner = $3,
                    lock_expiration_time = $4,
                    revision = revision + 1
                where id = $1 and revision = $2
                returning *
        "#
    );

    let locked = query_as::<_, Job>(&sql)
        .bind(job.id())
        .bind(job.revision())
        .bind(owner)
        .bind(expiration)
        .fetch_optional(executor)
        .await?;

    Ok(locked)
}

/// Clears the lock only if the row still carries the lock that was observed as expired.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", %table, job_id = %job.id()))]
pub async fn reset_expired_lock<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table: JobTable,
    job: &Job,
) -> Result<bool> {
    let table_name = qualified(escaped_schema, table);
    let sql = formatdoc!(
        r#"
            update {table_name}
                set
                    lock_owner = null,
                    lock_expiration_time = null,
                    revision = revision + 1
                where id = $1
                and lock_owner = $2
                and lock_expiration_time = $3
        "#
    );

    let reset = query(&sql)
        .bind(job.id())
        .bind(job.lock_owner())
        .bind(job.lock_expiration_time())
        .execute(executor)
        .await?
        .rows_affected();

    Ok(reset > 0)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", %table, lock_owner = owner))]
pub async fn unlock_owned_jobs<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table: JobTable,
    owner: &str,
    tenant: &TenantScope,
) -> Result<u64> {
    let table_name = qualified(escaped_schema, table);
    let tenant_clause = tenant_clause(tenant, 2);
    let sql = formatdoc!(
        r#"
            update {table_name}
                set
                    lock_owner = null,
                    lock_expiration_time = null,
                    revision = revision + 1
                where lock_owner = $1
                {tenant_clause}
        "#
    );

    let mut q = query(&sql).bind(owner);
    if let TenantScope::Tenant(tenant) = tenant {
        q = q.bind(tenant);
    }
    Ok(q.execute(executor).await?.rows_affected())
}
