use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::store::StoreError;

/// Opens (creating if missing) the SQLite store file in WAL mode, so
/// readers keep seeing the last committed index while a rebuild runs.
pub async fn connect(db_path: &Path) -> Result<SqlitePool, StoreError> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    pool(options(db_path)?.create_if_missing(true)).await
}

/// Opens an existing store file. Fails instead of creating anything.
pub async fn connect_existing(db_path: &Path) -> Result<SqlitePool, StoreError> {
    pool(options(db_path)?.create_if_missing(false)).await
}

fn options(db_path: &Path) -> Result<SqliteConnectOptions, StoreError> {
    Ok(
        SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .journal_mode(SqliteJournalMode::Wal),
    )
}

async fn pool(options: SqliteConnectOptions) -> Result<SqlitePool, StoreError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
