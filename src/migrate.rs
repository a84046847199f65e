//! Schema for the SQLite index.
//!
//! Vector IDs are unique per collection, so one database file can hold
//! several independent indexes.

use anyhow::Result;
use sqlx::SqlitePool;

/// Create the vector table and its indexes. Safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vectors (
            vector_id TEXT NOT NULL,
            collection TEXT NOT NULL,
            source TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (collection, vector_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vectors_collection_source ON vectors(collection, source)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
