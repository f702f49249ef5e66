use super::JobExecutorMigration;

pub const M000003_MIGRATION: JobExecutorMigration = JobExecutorMigration {
    number: 3,
    name: "m000003",
    is_breaking: false,
    stmts: &[
        "alter table :JOB_EXECUTOR_SCHEMA._private_jobs add column attempts int not null default 0;",
        "alter table :JOB_EXECUTOR_SCHEMA._private_timer_jobs add column attempts int not null default 0;",
        "alter table :JOB_EXECUTOR_SCHEMA._private_deadletter_jobs add column attempts int not null default 0;",
        "alter table :JOB_EXECUTOR_SCHEMA._private_history_jobs add column attempts int not null default 0;",
    ],
};
