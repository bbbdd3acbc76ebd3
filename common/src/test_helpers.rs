//! Shared Test Helpers for Cross-Crate Use
//!
//! Database URL resolution, connection setup and table helpers used by the
//! workspace's test suites.

use crate::config::PoolConfig;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, Statement};
use std::error::Error;

/// Get the test database URL from environment or default
///
/// `.env` files are honoured. Without a `DATABASE_URL` the suites run
/// against in-memory SQLite.
pub fn get_test_database_url() -> String {
    dotenvy::dotenv().ok();
    std::env::var("DATABASE_URL").unwrap_or_else(|_| get_test_in_memory_database_url())
}

/// Get an in-memory SQLite database URL for unit tests
pub fn get_test_in_memory_database_url() -> String {
    "sqlite::memory:".to_string()
}

/// Open a SeaORM connection to `database_url` with the given pool settings
pub async fn create_test_connection_with(
    database_url: &str,
    pool: &PoolConfig,
) -> Result<DatabaseConnection, Box<dyn Error + Send + Sync>> {
    let db = Database::connect(pool.connect_options(database_url)).await?;
    tracing::debug!("Connected to test database {}", database_url);
    Ok(db)
}

/// Generic table truncation in the given order
///
/// Missing tables are logged and skipped.
pub async fn truncate_tables<C: ConnectionTrait>(
    db: &C,
    tables: &[&str],
) -> Result<(), Box<dyn Error + Send + Sync>> {
    for table in tables {
        let query = match db.get_database_backend() {
            DbBackend::Postgres => format!("TRUNCATE TABLE {} RESTART IDENTITY CASCADE", table),
            _ => format!("DELETE FROM {}", table),
        };
        match db.execute_unprepared(&query).await {
            Ok(_) => tracing::debug!("Truncated table: {}", table),
            Err(e) => {
                tracing::debug!("Could not truncate table {}: {} (table may not exist)", table, e)
            }
        }
    }
    Ok(())
}

/// Count the rows of a table through any SeaORM connection
pub async fn count_rows<C: ConnectionTrait>(db: &C, table: &str) -> Result<i64, DbErr> {
    let backend = db.get_database_backend();
    let row = db
        .query_one(Statement::from_string(
            backend,
            format!("SELECT COUNT(*) AS count FROM {}", table),
        ))
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("no count row for {}", table)))?;
    row.try_get::<i64>("", "count")
}
