//! Database migrations.

use sea_orm_migration::prelude::*;

mod m20260301_000001_create_session;
mod m20260301_000002_create_execution;
mod m20260301_000003_create_report;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000001_create_session::Migration),
            Box::new(m20260301_000002_create_execution::Migration),
            Box::new(m20260301_000003_create_report::Migration),
        ]
    }
}
