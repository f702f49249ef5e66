use chrono::{DateTime, Utc};
use indoc::formatdoc;
use job_executor_job::{Job, JobTable};
use sqlx::{query_as, query_scalar, PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

use super::job_query_helpers::{push_due_filter, push_job_query};
use super::qualified;
use crate::errors::Result;
use crate::store::{DueFilter, JobQuery};

pub async fn find_job_by_id<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table: JobTable,
    id: Uuid,
) -> Result<Option<Job>> {
    let table_name = qualified(escaped_schema, table);
    let sql = format!("select * from {table_name} where id = $1");
    Ok(query_as::<_, Job>(&sql).bind(id).fetch_optional(executor).await?)
}

pub async fn find_jobs_by_ids<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table: JobTable,
    ids: &[Uuid],
) -> Result<Vec<Job>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let table_name = qualified(escaped_schema, table);
    let sql = format!("select * from {table_name} where id = any($1::uuid[])");
    Ok(query_as::<_, Job>(&sql).bind(ids).fetch_all(executor).await?)
}

/// Due rows without a live lock. Rows locked by a concurrent acquisition are skipped.
#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", %table, limit))]
pub async fn find_due_jobs<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table: JobTable,
    now: DateTime<Utc>,
    limit: usize,
    filter: &DueFilter,
) -> Result<Vec<Job>> {
    let table_name = qualified(escaped_schema, table);
    let mut builder = QueryBuilder::<Postgres>::new(format!("select * from {table_name} where (due_date is null or due_date <= "));
    builder
        .push_bind(now)
        .push(") and (lock_owner is null or lock_expiration_time < ")
        .push_bind(now)
        .push(")");
    push_due_filter(&mut builder, filter);
    builder
        .push(" order by due_date asc nulls first, create_time asc, id asc limit ")
        .push_bind(limit as i64)
        .push(" for update skip locked");

    Ok(builder.build_query_as::<Job>().fetch_all(executor).await?)
}

#[tracing::instrument(skip_all, err, fields(otel.kind="client", db.system="postgresql", %table, page_size))]
pub async fn find_expired_locks<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table: JobTable,
    now: DateTime<Utc>,
    page_size: usize,
) -> Result<Vec<Job>> {
    let table_name = qualified(escaped_schema, table);
    let sql = formatdoc!(
        r#"
            select * from {table_name}
                where lock_expiration_time < $1
                order by lock_expiration_time asc, id asc
                limit $2
                for update skip locked
        "#
    );

    Ok(query_as::<_, Job>(&sql)
        .bind(now)
        .bind(page_size as i64)
        .fetch_all(executor)
        .await?)
}

pub async fn find_jobs<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table: JobTable,
    query: &JobQuery,
) -> Result<Vec<Job>> {
    let table_name = qualified(escaped_schema, table);
    let mut builder = QueryBuilder::<Postgres>::new(format!("select * from {table_name}"));
    push_job_query(&mut builder, query);
    builder.push(" order by create_time asc, id asc");
    Ok(builder.build_query_as::<Job>().fetch_all(executor).await?)
}

pub async fn count_jobs<'e>(
    executor: impl PgExecutor<'e>,
    escaped_schema: &str,
    table: JobTable,
    query: &JobQuery,
) -> Result<u64> {
    let table_name = qualified(escaped_schema, table);
    let mut builder = QueryBuilder::<Postgres>::new(format!("select count(*) from {table_name}"));
    push_job_query(&mut builder, query);
    let count: i64 = builder
        .build_query_scalar::<i64>()
        .fetch_one(executor)
        .await?;
    Ok(count as u64)
}

/// `format('%I', ...)` applied by the server.
pub async fn escape_identifier<'e>(executor: impl PgExecutor<'e>, identifier: &str) -> Result<String> {
    let escaped: String = query_scalar("select format('%I', $1::text)")
        .bind(identifier)
        .fetch_one(executor)
        .await?;
    Ok(escaped)
}
