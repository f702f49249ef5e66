use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use job_executor::{
    AcquireJobsRunnable, AcquisitionMode, AsyncExecutor, AsyncExecutorOptions, JobCriteria,
    JobHandlerError, JobQuery, JobStore, JobStoreTx, JobTable, LockUpdate, NewJob, PgJobStore,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::helpers::{enable_logs, ids, wait_until, RecordingListener};

mod helpers;

/// Connects to `DATABASE_URL`, or returns `None` so the test can be skipped.
async fn test_pool() -> Option<PgPool> {
    let Ok(db_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL is not set, skipping PostgreSQL test");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&db_url)
        .await
        .expect("Failed to connect to database");
    Some(pool)
}

async fn with_test_schema<F, Fut>(test_fn: F)
where
    F: FnOnce(PgPool, String) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    enable_logs().await;
    let Some(pool) = test_pool().await else {
        return;
    };
    let schema = format!("job_executor_test_{}", uuid::Uuid::now_v7().simple());
    test_fn(pool.clone(), schema.clone()).await;
    sqlx::query(&format!("drop schema if exists {schema} cascade"))
        .execute(&pool)
        .await
        .expect("Failed to drop test schema");
}

async fn pg_executor(
    pool: PgPool,
    schema: &str,
    options: impl FnOnce(AsyncExecutorOptions) -> AsyncExecutorOptions,
) -> AsyncExecutor<PgJobStore> {
    options(
        AsyncExecutorOptions::new()
            .pg_pool(pool)
            .schema(schema)
            .default_async_job_acquire_wait_time(Duration::from_millis(50))
            .default_timer_job_acquire_wait_time(Duration::from_millis(50)),
    )
    .init()
    .await
    .expect("Failed to init executor")
}

#[tokio::test]
async fn migrations_are_idempotent() {
    with_test_schema(|pool, schema| async move {
        let executor = pg_executor(pool.clone(), &schema, |options| options).await;
        executor.job_manager().store().migrate().await.unwrap();

        let migrations: i64 = sqlx::query_scalar(&format!(
            "select count(*) from {}.migrations",
            executor.job_manager().store().escaped_schema()
        ))
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(migrations, 3);
    })
    .await;
}

#[tokio::test]
async fn two_nodes_never_acquire_the_same_job() {
    with_test_schema(|pool, schema| async move {
        let node_a = pg_executor(pool.clone(), &schema, |options| {
            options
                .lock_owner("node-a")
                .max_async_jobs_due_per_acquisition(1)
        })
        .await;
        let node_b = pg_executor(pool.clone(), &schema, |options| {
            options
                .lock_owner("node-b")
                .max_async_jobs_due_per_acquisition(1)
        })
        .await;

        let mut scheduled = Vec::new();
        for _ in 0..2 {
            scheduled.push(
                node_a
                    .job_manager()
                    .schedule_async_job(NewJob::new("job"))
                    .await
                    .unwrap(),
            );
        }

        let listener = Arc::new(RecordingListener::default());
        let runnable_a =
            AcquireJobsRunnable::new(AcquisitionMode::AsyncJobsDue, node_a.clone(), listener.clone());
        let runnable_b =
            AcquireJobsRunnable::new(AcquisitionMode::AsyncJobsDue, node_b.clone(), listener);
        tokio::join!(runnable_a.run_cycle(), runnable_b.run_cycle());
        tokio::join!(runnable_a.run_cycle(), runnable_b.run_cycle());

        let locked = node_a
            .job_manager()
            .find_jobs(
                JobTable::Executable,
                &JobQuery::new(JobCriteria::new().locked(true)),
            )
            .await
            .unwrap();
        assert_eq!(locked.len(), 2);
        let owners: Vec<_> = locked
            .iter()
            .map(|job| job.lock_owner().clone().unwrap())
            .collect();
        assert!(owners.iter().all(|owner| owner == "node-a" || owner == "node-b"));

        let released = node_a.unacquire_owned_jobs(None).await.unwrap()
            + node_b.unacquire_owned_jobs(None).await.unwrap();
        assert_eq!(released, 2);
    })
    .await;
}

#[tokio::test]
async fn jobs_and_timers_run_to_completion() {
    with_test_schema(|pool, schema| async move {
        let executor = pg_executor(pool, &schema, |options| {
            options.register_fn("ok", |_ctx| async { Ok::<(), JobHandlerError>(()) })
        })
        .await;
        let job_manager = executor.job_manager();

        job_manager
            .schedule_async_job(NewJob::new("ok"))
            .await
            .unwrap();
        job_manager
            .schedule_timer_job(
                NewJob::builder()
                    .handler_type("ok")
                    .due_date(Utc::now() - ChronoDuration::seconds(1))
                    .build(),
            )
            .await
            .unwrap();

        executor.start().await;
        let done = wait_until(Duration::from_secs(10), move || async move {
            let mut remaining = 0;
            for table in JobTable::ALL {
                remaining += job_manager
                    .count_jobs(table, &JobQuery::all())
                    .await
                    .unwrap();
            }
            remaining == 0
        })
        .await;
        executor.shutdown().await.unwrap();
        assert!(done);
    })
    .await;
}

#[tokio::test]
async fn failures_retry_through_the_timer_table() {
    with_test_schema(|pool, schema| async move {
        let executor = pg_executor(pool, &schema, |options| {
            options.register_fn("failing", |_ctx| async {
                Err::<(), _>(JobHandlerError::new("db test failure"))
            })
        })
        .await;
        let job_manager = executor.job_manager();
        let job = job_manager
            .schedule_async_job(NewJob::builder().handler_type("failing").retries(2).build())
            .await
            .unwrap();

        job_manager
            .execute(JobTable::Executable, job.clone())
            .await
            .unwrap();
        let timers = job_manager
            .find_jobs(
                JobTable::Timer,
                &JobQuery::new(JobCriteria::new().correlation_id(*job.correlation_id())),
            )
            .await
            .unwrap();
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].retries(), &1);
        assert_eq!(
            timers[0].exception_message(),
            &Some("db test failure".to_string())
        );

        let job = job_manager
            .move_timer_to_executable(*timers[0].id())
            .await
            .unwrap();
        job_manager
            .execute(JobTable::Executable, job)
            .await
            .unwrap();
        let dead = job_manager
            .count_jobs(JobTable::DeadLetter, &JobQuery::all())
            .await
            .unwrap();
        assert_eq!(dead, 1);
    })
    .await;
}

#[tokio::test]
async fn bulk_calls_respect_the_clause_limit() {
    with_test_schema(|pool, schema| async move {
        let executor = pg_executor(pool, &schema, |options| options.max_in_clause_size(2)).await;
        let job_manager = executor.job_manager();

        let mut jobs = Vec::new();
        for _ in 0..5 {
            jobs.push(
                job_manager
                    .schedule_async_job(NewJob::new("job"))
                    .await
                    .unwrap(),
            );
        }
        let job_ids = ids(&jobs);

        let mut tx = job_manager.store().begin().await.unwrap();
        let oversized = tx
            .bulk_update_lock(
                JobTable::Executable,
                &job_ids,
                LockUpdate::Release { owner: "pg-node" },
            )
            .await;
        assert!(oversized.is_err());
        drop(tx);

        let locked = job_manager
            .bulk_lock_jobs(JobTable::Executable, &job_ids, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(locked, 5);
        let deleted = job_manager
            .bulk_delete(JobTable::Executable, &job_ids)
            .await
            .unwrap();
        assert_eq!(deleted, 5);
    })
    .await;
}

#[tokio::test]
async fn bulk_locks_leave_other_nodes_alone() {
    with_test_schema(|pool, schema| async move {
        let node_a = pg_executor(pool.clone(), &schema, |options| options.lock_owner("node-a")).await;
        let node_b = pg_executor(pool, &schema, |options| options.lock_owner("node-b")).await;

        let job = node_a
            .job_manager()
            .schedule_async_job(NewJob::new("job"))
            .await
            .unwrap();
        let job_ids = [*job.id()];
        let lock_time = Duration::from_secs(60);

        let locked = node_a
            .job_manager()
            .bulk_lock_jobs(JobTable::Executable, &job_ids, lock_time)
            .await
            .unwrap();
        assert_eq!(locked, 1);

        let stolen = node_b
            .job_manager()
            .bulk_lock_jobs(JobTable::Executable, &job_ids, lock_time)
            .await
            .unwrap();
        assert_eq!(stolen, 0);
        let cleared = node_b
            .job_manager()
            .bulk_unlock_jobs(JobTable::Executable, &job_ids)
            .await
            .unwrap();
        assert_eq!(cleared, 0);

        let job = node_b
            .job_manager()
            .find_job(JobTable::Executable, *job.id())
            .await
            .unwrap()
            .unwrap();
        assert!(job.is_owned_by("node-a"));

        let released = node_a
            .job_manager()
            .bulk_unlock_jobs(JobTable::Executable, &job_ids)
            .await
            .unwrap();
        assert_eq!(released, 1);
    })
    .await;
}
