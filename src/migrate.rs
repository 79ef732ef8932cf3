use anyhow::Result;
use sqlx::SqlitePool;

/// Create the vector table and its indexes. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per chunk; every collection shares the table.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            collection TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            source_document TEXT NOT NULL,
            sequence_index INTEGER NOT NULL,
            heading_path_json TEXT NOT NULL DEFAULT '[]',
            span_start INTEGER NOT NULL,
            span_end INTEGER NOT NULL,
            source_url TEXT,
            text TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_source ON chunk_vectors(collection, source_document)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
