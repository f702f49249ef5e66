use sqlx::{Postgres, Transaction};

pub mod m000001;
pub mod m000002;
pub mod m000003;

pub struct JobExecutorMigration {
    number: u32,
    name: &'static str,
    is_breaking: bool,
    pub(crate) stmts: &'static [&'static str],
}

impl JobExecutorMigration {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_breaking(&self) -> bool {
        self.is_breaking
    }

    pub fn migration_number(&self) -> u32 {
        self.number
    }

    pub async fn execute<'e>(
        &self,
        tx: &mut Transaction<'e, Postgres>,
        escaped_schema: &str,
    ) -> Result<(), sqlx::Error> {
        for stmt in self.stmts {
            let stmt = stmt.replace(":JOB_EXECUTOR_SCHEMA", escaped_schema);
            sqlx::query(&stmt).execute(tx.as_mut()).await?;
        }

        Ok(())
    }
}

pub const JOB_EXECUTOR_MIGRATIONS: &[JobExecutorMigration] = &[
    m000001::M000001_MIGRATION,
    m000002::M000002_MIGRATION,
    m000003::M000003_MIGRATION,
];
