//! Database module providing connection management, migrations, and queries.

mod lookups;
pub mod memory;
mod orders;

use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::migration::Migrator;

pub use memory::MemoryOrderStore;

/// PostgreSQL connection pool (SeaORM manages pooling internally).
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Connect using `DATABASE_URL` from configuration.
    pub async fn new(config: &Config) -> AppResult<Self> {
        let max_connections = (num_cpus::get() as u32 * 4).clamp(4, 64);

        let mut options = ConnectOptions::new(config.database_url.clone());
        options
            .max_connections(max_connections)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);

        let conn = Database::connect(options)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to database: {}", e)))?;

        info!(
            "Database pool ready (max {} connections)",
            max_connections
        );

        Ok(Self { conn })
    }

    /// Get access to the connection for executing queries.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Apply pending migrations.
    pub async fn run_migrations(&self) -> AppResult<()> {
        Migrator::up(&self.conn, None)
            .await
            .map_err(|e| AppError::Database(format!("Failed to run migrations: {}", e)))
    }
}

/// Keep unique violations as conflicts; prefix everything else with `context`.
fn write_error(context: &str, err: sea_orm::DbErr) -> AppError {
    match AppError::from(err) {
        AppError::Database(msg) => AppError::Database(format!("{}: {}", context, msg)),
        other => other,
    }
}
