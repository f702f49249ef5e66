use super::JobExecutorMigration;

pub const M000002_MIGRATION: JobExecutorMigration = JobExecutorMigration {
    number: 2,
    name: "m000002",
    is_breaking: false,
    stmts: &[
        r#"
            create index jobs_acquire_idx on :JOB_EXECUTOR_SCHEMA._private_jobs
                using btree (due_date, lock_expiration_time);
        "#,
        r#"
            create index timer_jobs_acquire_idx on :JOB_EXECUTOR_SCHEMA._private_timer_jobs
                using btree (due_date, lock_expiration_time);
        "#,
        r#"
            create index history_jobs_acquire_idx on :JOB_EXECUTOR_SCHEMA._private_history_jobs
                using btree (create_time, lock_expiration_time);
        "#,
        r#"
            create index jobs_lock_owner_idx on :JOB_EXECUTOR_SCHEMA._private_jobs
                using btree (lock_owner, tenant_id) where lock_owner is not null;
        "#,
        r#"
            create index timer_jobs_lock_owner_idx on :JOB_EXECUTOR_SCHEMA._private_timer_jobs
                using btree (lock_owner, tenant_id) where lock_owner is not null;
        "#,
        r#"
            create index history_jobs_lock_owner_idx on :JOB_EXECUTOR_SCHEMA._private_history_jobs
                using btree (lock_owner, tenant_id) where lock_owner is not null;
        "#,
        r#"
            create index jobs_correlation_idx on :JOB_EXECUTOR_SCHEMA._private_jobs
                using btree (correlation_id);
        "#,
        r#"
            create index timer_jobs_correlation_idx on :JOB_EXECUTOR_SCHEMA._private_timer_jobs
                using btree (correlation_id);
        "#,
    ],
};
