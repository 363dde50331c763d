use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;

/// Open the SQLite file of one index.
///
/// `writable = false` opens read-only and fails if the file is missing, so a
/// half-deleted index surfaces as an error instead of an empty database.
pub async fn connect(db_path: &Path, writable: bool) -> Result<SqlitePool, sqlx::Error> {
    // Rollback journal instead of WAL: the file is renamed into place after
    // the pool closes and must be self-contained.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(writable)
        .read_only(!writable)
        .journal_mode(SqliteJournalMode::Delete);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}
