use sqlx::SqlitePool;

use crate::error::Result;

/// Create the index tables if they do not exist yet.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per chunk; seq records insertion order for tie-breaking
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            extension TEXT NOT NULL,
            size INTEGER NOT NULL,
            modified_at INTEGER NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            UNIQUE(collection, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per indexed path; paths with identical content share entries
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            collection TEXT NOT NULL,
            path TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            chunk_count INTEGER NOT NULL,
            indexed_at INTEGER NOT NULL,
            PRIMARY KEY (collection, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_file ON entries(collection, file_hash)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_path ON entries(collection, path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_hash ON files(collection, file_hash)")
        .execute(pool)
        .await?;

    Ok(())
}
