use chrono::{DateTime, Utc};
use indoc::formatdoc;
use job_executor_job::JobTable;
use sqlx::{query, PgExecutor};
use uuid::Uuid;

use super::qualified;
use crate::errors::Result;

/// Locks the listed rows for `owner` unless another node holds a live lock on them.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", %table, ids = ids.len()))]
pub async fn bulk_acquire_lock<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table: JobTable,
    ids: &[Uuid],
    owner: &str,
    now: DateTime<Utc>,
    expiration: DateTime<Utc>,
) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let table_name = qualified(escaped_schema, table);
    let sql = formatdoc!(
        r#"
            update {table_name}
                set
                    lock_owner = $2,
                    lock_expiration_time = $3,
                    revision = revision + 1
                where id = any($1::uuid[])
                and (
                    lock_owner is null
                    or lock_expiration_time < $4
                    or lock_owner = $2
                )
        "#
    );

    let updated = query(&sql)
        .bind(ids)
        .bind(owner)
        .bind(expiration)
        .bind(now)
        .execute(executor)
        .await?
        .rows_affected();

    Ok(updated)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", %table, ids = ids.len()))]
pub async fn bulk_release_lock<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table: JobTable,
    ids: &[Uuid],
    owner: &str,
) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let table_name = qualified(escaped_schema, table);
    let sql = formatdoc!(
        r#"
            update {table_name}
                set
                    lock_owner = null,
                    lock_expiration_time = null,
                    revision = revision + 1
                where id = any($1::uuid[])
                and lock_owner = $2
        "#
    );

    Ok(query(&sql)
        .bind(ids)
        .bind(owner)
        .execute(executor)
        .await?
        .rows_affected())
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", %table, ids = ids.len()))]
pub async fn bulk_delete<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table: JobTable,
    ids: &[Uuid],
) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let table_name = qualified(escaped_schema, table);
    let sql = format!("delete from {table_name} where id = any($1::uuid[])");

    Ok(query(&sql).bind(ids).execute(executor).await?.rows_affected())
}
