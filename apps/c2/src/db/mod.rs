//! Database module providing connection management, migrations, and queries.

pub mod executions;
pub mod reports;
pub mod search;
pub mod sessions;

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

use crate::config::DatabaseSettings;
use crate::error::{AppError, AppResult};
use crate::migration::Migrator;

/// Database connection pool wrapper using SeaORM.
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration.
    pub async fn new(settings: &DatabaseSettings) -> AppResult<Self> {
        let mut opt = ConnectOptions::new(&settings.url);
        opt.max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
            .sqlx_logging(false);

        let conn = Database::connect(opt)
            .await
            .map_err(|e| AppError::Internal(format!("failed to connect to database: {e}")))?;

        Ok(DbPool { conn })
    }

    /// Run pending database migrations.
    pub async fn run_migrations(&self) -> AppResult<()> {
        Migrator::up(&self.conn, None)
            .await
            .map_err(|e| AppError::Internal(format!("failed to run migrations: {e}")))?;
        Ok(())
    }

    /// Get the database connection.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }
}

/// The current instant as stored in session and execution rows.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
pub(crate) async fn test_pool() -> DbPool {
    let pool = DbPool::new(&DatabaseSettings {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 1,
        connect_timeout_secs: 5,
        acquire_timeout_secs: 5,
    })
    .await
    .expect("in-memory database");
    pool.run_migrations().await.expect("migrations apply");
    pool
}
