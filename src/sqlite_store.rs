//! SQLite-backed [`Store`] implementation.
//!
//! Every record is one row of the `vectors` table (see
//! [`migrate`](crate::migrate)); the embedding is a little-endian `f32` BLOB.
//! Rows are scoped by a `collection` column so several indexes can share one
//! database file.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::IndexError;
use crate::models::{ChunkMetadata, IndexedVector, SourceSummary};
use crate::store::{MetadataFilter, ReplaceOutcome, Store};

/// SQLite implementation of the [`Store`] trait for one collection.
pub struct SqliteStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, collection: impl Into<String>) -> Self {
        Self {
            pool,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

async fn insert_rows(
    conn: &mut sqlx::SqliteConnection,
    collection: &str,
    records: &[IndexedVector],
) -> Result<(), IndexError> {
    let now = chrono::Utc::now().timestamp();
    for r in records {
        sqlx::query(
            r#"
            INSERT INTO vectors (vector_id, collection, source, chunk_index, content,
                                 metadata_json, embedding, dims, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&r.vector_id)
        .bind(collection)
        .bind(&r.source)
        .bind(r.chunk_index)
        .bind(&r.content)
        .bind(r.metadata.to_json())
        .bind(vec_to_blob(&r.embedding))
        .bind(r.embedding.len() as i64)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(IndexError::write)?;
    }
    Ok(())
}

/// JSON path for a metadata key, quoted so keys with dots stay one label.
fn json_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('"', ""))
}

fn row_to_vector(row: &SqliteRow) -> Result<IndexedVector, sqlx::Error> {
    let metadata_json: String = row.try_get("metadata_json")?;
    let blob: Vec<u8> = row.try_get("embedding")?;
    Ok(IndexedVector {
        vector_id: row.try_get("vector_id")?,
        source: row.try_get("source")?,
        chunk_index: row.try_get("chunk_index")?,
        content: row.try_get("content")?,
        metadata: ChunkMetadata::from_json(&metadata_json),
        embedding: blob_to_vec(&blob),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert(&self, records: &[IndexedVector]) -> Result<(), IndexError> {
        let mut tx = self.pool.begin().await.map_err(IndexError::write)?;
        insert_rows(&mut *tx, &self.collection, records).await?;
        tx.commit().await.map_err(IndexError::write)?;
        Ok(())
    }

    async fn delete_by_source(&self, source: &str) -> Result<u64, IndexError> {
        let result = sqlx::query("DELETE FROM vectors WHERE collection = ? AND source = ?")
            .bind(&self.collection)
            .bind(source)
            .execute(&self.pool)
            .await
            .map_err(IndexError::write)?;
        Ok(result.rows_affected())
    }

    async fn replace_source(
        &self,
        source: &str,
        records: &[IndexedVector],
    ) -> Result<ReplaceOutcome, IndexError> {
        let mut tx = self.pool.begin().await.map_err(IndexError::write)?;

        let deleted = sqlx::query("DELETE FROM vectors WHERE collection = ? AND source = ?")
            .bind(&self.collection)
            .bind(source)
            .execute(&mut *tx)
            .await
            .map_err(IndexError::write)?
            .rows_affected();

        insert_rows(&mut *tx, &self.collection, records).await?;
        tx.commit().await.map_err(IndexError::write)?;

        Ok(ReplaceOutcome {
            deleted,
            inserted: records.len() as u64,
        })
    }

    async fn fetch(
        &self,
        filter: &MetadataFilter,
        limit: Option<usize>,
    ) -> Result<Vec<IndexedVector>, IndexError> {
        let mut sql = String::from(
            "SELECT vector_id, source, chunk_index, content, metadata_json, embedding \
             FROM vectors WHERE collection = ?",
        );
        let mut binds: Vec<String> = Vec::new();
        for (key, value) in filter.conditions() {
            if key == "source" {
                sql.push_str(" AND source = ?");
            } else {
                sql.push_str(" AND CAST(json_extract(metadata_json, ?) AS TEXT) = ?");
                binds.push(json_path(key));
            }
            binds.push(value.to_string());
        }
        sql.push_str(" ORDER BY source ASC, chunk_index ASC");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut query = sqlx::query(&sql).bind(&self.collection);
        for b in binds {
            query = query.bind(b);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(IndexError::read)?;

        rows.iter()
            .map(row_to_vector)
            .collect::<Result<Vec<_>, _>>()
            .map_err(IndexError::read)
    }

    async fn list_sources(&self) -> Result<Vec<SourceSummary>, IndexError> {
        let rows = sqlx::query(
            r#"
            SELECT source,
                   COUNT(*) AS vectors,
                   MAX(json_extract(metadata_json, '$.modified_ms')) AS modified_ms
            FROM vectors
            WHERE collection = ?
            GROUP BY source
            ORDER BY source ASC
            "#,
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await
        .map_err(IndexError::read)?;

        rows.iter()
            .map(|row| {
                Ok(SourceSummary {
                    source: row.try_get("source")?,
                    vectors: row.try_get::<i64, _>("vectors")? as u64,
                    modified_ms: row.try_get("modified_ms")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(IndexError::read)
    }
}
