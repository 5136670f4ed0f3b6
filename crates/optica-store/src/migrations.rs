//! # Database Migrations
//!
//! Embedded SQL migrations for the SQLite-backed store.
//!
//! Migration files live in `migrations/sqlite/` at the workspace root,
//! named `NNN_description.sql`. Never modify an applied migration; add a
//! new one.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::StoreResult;

/// Embedded migrations from the `migrations/sqlite` directory.
///
/// `sqlx::migrate!()` embeds the SQL files into the binary at compile time;
/// no runtime file access is needed.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending migrations.
///
/// Idempotent and ordered; each migration runs in its own transaction and
/// is recorded in `_sqlx_migrations`.
pub async fn run_migrations(pool: &SqlitePool) -> StoreResult<()> {
    info!("checking for pending migrations");
    MIGRATOR.run(pool).await?;
    info!("all migrations applied");
    Ok(())
}
