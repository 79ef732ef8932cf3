//! SQLite-backed [`VectorStore`] implementation.
//!
//! Every row is scoped to a collection name, so several corpora can share
//! one database file. Queries load the collection's vectors and rank them
//! by brute-force similarity under the configured [`DistanceMetric`];
//! document replacement runs in a single transaction.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use rag_support_core::embedding::{blob_to_vec, vec_to_blob, DistanceMetric};
use rag_support_core::models::{CharSpan, Chunk};
use rag_support_core::store::{sort_matches, VectorMatch, VectorRecord, VectorStore};

pub struct SqliteVectorStore {
    pool: SqlitePool,
    collection: String,
    metric: DistanceMetric,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool, collection: &str, metric: DistanceMetric) -> Self {
        Self {
            pool,
            collection: collection.to_string(),
            metric,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

const COLUMNS: &str = "chunk_id, source_document, sequence_index, heading_path_json, \
                       span_start, span_end, source_url, text, content_hash, embedding";

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    let heading_json: String = row.try_get("heading_path_json")?;
    let sequence_index: i64 = row.try_get("sequence_index")?;
    let span_start: i64 = row.try_get("span_start")?;
    let span_end: i64 = row.try_get("span_end")?;

    Ok(Chunk {
        id: row.try_get("chunk_id")?,
        text: row.try_get("text")?,
        source_document: row.try_get("source_document")?,
        heading_path: serde_json::from_str(&heading_json)?,
        sequence_index: sequence_index as usize,
        char_span: CharSpan::new(span_start as usize, span_end as usize),
        source_url: row.try_get("source_url")?,
        content_hash: row.try_get("content_hash")?,
    })
}

async fn insert_record<'e, E>(executor: E, collection: &str, record: &VectorRecord, now: i64) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let chunk = &record.chunk;
    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (collection, chunk_id, source_document, sequence_index,
                                   heading_path_json, span_start, span_end, source_url,
                                   text, content_hash, dims, embedding, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(collection, chunk_id) DO UPDATE SET
            source_document = excluded.source_document,
            sequence_index = excluded.sequence_index,
            heading_path_json = excluded.heading_path_json,
            span_start = excluded.span_start,
            span_end = excluded.span_end,
            source_url = excluded.source_url,
            text = excluded.text,
            content_hash = excluded.content_hash,
            dims = excluded.dims,
            embedding = excluded.embedding,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(collection)
    .bind(&chunk.id)
    .bind(&chunk.source_document)
    .bind(chunk.sequence_index as i64)
    .bind(serde_json::to_string(&chunk.heading_path)?)
    .bind(chunk.char_span.start as i64)
    .bind(chunk.char_span.end as i64)
    .bind(&chunk.source_url)
    .bind(&chunk.text)
    .bind(&chunk.content_hash)
    .bind(record.embedding.len() as i64)
    .bind(vec_to_blob(&record.embedding))
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for record in records {
            insert_record(&mut *tx, &self.collection, record, now).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_source(&self, source_id: &str) -> Result<usize> {
        let result = sqlx::query(
            "DELETE FROM chunk_vectors WHERE collection = ? AND source_document = ?",
        )
        .bind(&self.collection)
        .bind(source_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn replace_source(&self, source_id: &str, records: &[VectorRecord]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_vectors WHERE collection = ? AND source_document = ?")
            .bind(&self.collection)
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        for record in records {
            insert_record(&mut *tx, &self.collection, record, now).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, embedding: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunk_vectors WHERE collection = ?",
            COLUMNS
        ))
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let stored = blob_to_vec(&blob);
            matches.push(VectorMatch {
                chunk: row_to_chunk(row)?,
                similarity: self.metric.similarity(embedding, &stored),
                embedding: stored,
            });
        }

        sort_matches(&mut matches);
        matches.truncate(k);
        Ok(matches)
    }

    async fn source_chunks(&self, source_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunk_vectors WHERE collection = ? AND source_document = ? \
             ORDER BY sequence_index",
            COLUMNS
        ))
        .bind(&self.collection)
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    async fn sources(&self) -> Result<Vec<String>> {
        let sources: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT source_document FROM chunk_vectors WHERE collection = ? \
             ORDER BY source_document",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }

    async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
