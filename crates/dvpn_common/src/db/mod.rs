use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::info;

pub mod models;

pub type DbPool = SqlitePool;

// migrations live in the workspace root so that every crate shares them
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// Opens (creating if necessary) and migrates the node database. Returns DB pool object.
pub async fn init_db(path: &str) -> Result<DbPool, sqlx::Error> {
    info!("Initializing DB pool using {path}");
    let opts = SqliteConnectOptions::from_str(path)?.create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

/// Creates a migrated in-memory database.
///
/// The pool is limited to a single connection which never expires, since every
/// SQLite in-memory connection owns a separate database.
pub async fn setup_pool() -> DbPool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory database");
    MIGRATOR
        .run(&pool)
        .await
        .expect("Cannot run database migrations.");
    pool
}
