//! Schema installation and migrations for the job tables.

pub mod pg_version;
pub mod sql;

use indoc::formatdoc;
use pg_version::{check_postgres_version, MIN_SERVER_VERSION};
use sql::JOB_EXECUTOR_MIGRATIONS;
use sqlx::{query, query_as, FromRow, PgPool};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Could not parse postgres server_version_num: {0}")]
    ParseVersion(#[from] std::num::ParseIntError),
    #[error("PostgreSQL server_version_num {0} is too old, at least {MIN_SERVER_VERSION} is required")]
    IncompatibleVersion(u32),
    #[error("Schema is at revision {latest_migration} with breaking migration {latest_breaking_migration}, but this build only knows migrations up to {highest_migration}")]
    IncompatibleRevision {
        latest_migration: i32,
        latest_breaking_migration: i32,
        highest_migration: u32,
    },
    #[error("Migration failed: {0}")]
    Sql(#[from] sqlx::Error),
}

#[derive(FromRow, Debug, Default)]
struct SchemaState {
    server_version_num: String,
    latest_id: Option<i32>,
    latest_breaking_id: Option<i32>,
}

impl SchemaState {
    fn needs(&self, migration_number: u32) -> bool {
        match self.latest_id {
            None => true,
            Some(id) => i64::from(migration_number) > i64::from(id),
        }
    }
}

/// Creates the schema and its migrations bookkeeping table when missing.
async fn ensure_schema(pool: &PgPool, escaped_schema: &str) -> Result<(), MigrateError> {
    let mut tx = pool.begin().await?;
    query(&format!("create schema if not exists {escaped_schema}"))
        .execute(tx.as_mut())
        .await?;
    query(&formatdoc!(
        r#"
            create table if not exists {escaped_schema}.migrations (
                id int primary key,
                ts timestamptz default now() not null,
                breaking boolean not null default false
            )
        "#
    ))
    .execute(tx.as_mut())
    .await?;
    tx.commit().await?;
    Ok(())
}

async fn schema_state(pool: &PgPool, escaped_schema: &str) -> Result<SchemaState, MigrateError> {
    let sql = formatdoc!(
        r#"
            select current_setting('server_version_num') as server_version_num,
            (select id from {escaped_schema}.migrations order by id desc limit 1) as latest_id,
            (select id from {escaped_schema}.migrations where breaking order by id desc limit 1) as latest_breaking_id
        "#
    );
    Ok(query_as::<_, SchemaState>(&sql).fetch_one(pool).await?)
}

/// Brings `escaped_schema` up to the latest known migration.
///
/// Every migration runs in its own transaction together with its bookkeeping row, so a
/// failed migration leaves the schema at the previous revision.
pub async fn migrate(pool: &PgPool, escaped_schema: &str) -> Result<(), MigrateError> {
    ensure_schema(pool, escaped_schema).await?;
    let state = schema_state(pool, escaped_schema).await?;
    let pg_version = check_postgres_version(&state.server_version_num)?;

    let mut highest_migration = 0;
    let mut applied = 0usize;
    for migration in JOB_EXECUTOR_MIGRATIONS {
        let number = migration.migration_number();
        highest_migration = highest_migration.max(number);

        if !state.needs(number) {
            continue;
        }

        info!(
            pg_version,
            migration = migration.name(),
            breaking = migration.is_breaking(),
            "Applying job executor migration"
        );
        let mut tx = pool.begin().await?;
        migration.execute(&mut tx, escaped_schema).await?;
        query(&format!(
            "insert into {escaped_schema}.migrations (id, breaking) values ($1, $2)"
        ))
        .bind(number as i32)
        .bind(migration.is_breaking())
        .execute(tx.as_mut())
        .await?;
        tx.commit().await?;
        applied += 1;
    }

    if applied > 0 {
        info!(applied, "Job executor schema is up to date");
    }

    if let Some(latest_breaking_migration) = state.latest_breaking_id {
        if i64::from(highest_migration) < i64::from(latest_breaking_migration) {
            return Err(MigrateError::IncompatibleRevision {
                latest_migration: state.latest_id.unwrap_or(0),
                latest_breaking_migration,
                highest_migration,
            });
        }
    }

    if let Some(latest_migration) = state.latest_id {
        if i64::from(highest_migration) < i64::from(latest_migration) {
            warn!(
                latest_migration,
                highest_migration,
                "Schema was migrated by a newer build, continuing anyway"
            );
        }
    }

    Ok(())
}
