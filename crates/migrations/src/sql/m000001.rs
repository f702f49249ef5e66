use super::JobExecutorMigration;

macro_rules! job_table {
    ($table:literal) => {
        concat!(
            "create table :JOB_EXECUTOR_SCHEMA.",
            $table,
            r#" (
                id uuid primary key,
                correlation_id uuid not null,
                job_type text not null check (job_type in ('message', 'timer')),
                handler_type text not null check (length(handler_type) > 0),
                handler_configuration jsonb,
                custom_values text,
                due_date timestamptz,
                retries int not null,
                lock_owner text,
                lock_expiration_time timestamptz,
                tenant_id text check (tenant_id is null or length(tenant_id) > 0),
                category text,
                exception_message text,
                exception_stacktrace text,
                revision int not null default 1,
                create_time timestamptz not null default now(),
                constraint lock_owner_with_expiration check (
                    (lock_owner is null) = (lock_expiration_time is null)
                )
            );"#
        )
    };
}

pub const M000001_MIGRATION: JobExecutorMigration = JobExecutorMigration {
    number: 1,
    name: "m000001",
    is_breaking: false,
    stmts: &[
        job_table!("_private_jobs"),
        job_table!("_private_timer_jobs"),
        job_table!("_private_deadletter_jobs"),
        job_table!("_private_history_jobs"),
    ],
};
