//! Vector index client.
//!
//! [`VectorIndex`] combines a [`Store`] with an [`Embedder`]: chunks go in as
//! text and come back out ranked by cosine similarity. Every vector carries
//! its originating file path in `source`, which is the key for deletion and
//! for drift detection during reconciliation.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::embedding::{
    cosine_similarity, create_embedder, embed_query, embed_with_retry, Embedder, RetryPolicy,
};
use crate::error::{EmbeddingError, IndexError, IngestError};
use crate::migrate;
use crate::models::{Chunk, IndexedVector, SearchHit, SourceSummary};
use crate::sqlite_store::SqliteStore;
use crate::store::{MetadataFilter, ReplaceOutcome, Store};

pub struct VectorIndex {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    retry: RetryPolicy,
    batch_size: usize,
}

/// Failure on the query path.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl VectorIndex {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        retry: RetryPolicy,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            retry,
            batch_size: batch_size.max(1),
        }
    }

    /// Index over `store` with retry and batch settings from `[embedding]`.
    pub fn with_config(store: Arc<dyn Store>, embedder: Arc<dyn Embedder>, config: &Config) -> Self {
        Self::new(
            store,
            embedder,
            RetryPolicy::from_config(&config.embedding),
            config.embedding.batch_size,
        )
    }

    /// Open the configured SQLite index (creating and migrating it if
    /// needed) with the configured embedder.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool, config.index.collection.clone()));
        let embedder = create_embedder(&config.embedding)?;
        Ok(Self::with_config(store, embedder, config))
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<IndexedVector>, EmbeddingError> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors =
            embed_with_retry(self.embedder.as_ref(), &texts, &self.retry, self.batch_size).await?;
        Ok(chunks
            .iter()
            .zip(vectors)
            .map(|(c, v)| IndexedVector::from_chunk(c, v))
            .collect())
    }

    /// Embed and append. Does not remove existing vectors of the same source.
    pub async fn add_documents(&self, chunks: &[Chunk]) -> Result<usize, IngestError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let records = self.embed_chunks(chunks).await?;
        self.store.insert(&records).await?;
        Ok(records.len())
    }

    /// Remove every vector whose `source` equals `source`. Idempotent.
    pub async fn delete_by_source(&self, source: &str) -> Result<u64, IndexError> {
        self.store.delete_by_source(source).await
    }

    /// Embed `chunks` first, then swap the source's vectors in one atomic
    /// store operation. An embedding failure leaves the old vectors in place.
    pub async fn replace_source(
        &self,
        source: &str,
        chunks: &[Chunk],
    ) -> Result<ReplaceOutcome, IngestError> {
        let records = self.embed_chunks(chunks).await?;
        Ok(self.store.replace_source(source, &records).await?)
    }

    /// Up to `k` hits, most similar first.
    ///
    /// A blank `query` skips embedding and returns the filtered chunks in
    /// `(source, chunk_index)` order, which is how callers enumerate a
    /// source. Ties in score fall back to the same order.
    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let all = MetadataFilter::new();
        let filter = filter.unwrap_or(&all);

        if query.trim().is_empty() {
            let rows = self.store.fetch(filter, Some(k)).await?;
            return Ok(rows
                .into_iter()
                .map(|v| SearchHit::from_vector(v, None))
                .collect());
        }

        let query_vec = embed_query(self.embedder.as_ref(), query, &self.retry).await?;
        let candidates = self.store.fetch(filter, None).await?;

        let mut scored: Vec<(f32, IndexedVector)> = candidates
            .into_iter()
            .map(|v| (cosine_similarity(&query_vec, &v.embedding), v))
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.partial_cmp(sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, v)| SearchHit::from_vector(v, Some(score)))
            .collect())
    }

    /// Every distinct `source` currently in the index.
    pub async fn list_distinct_sources(&self) -> Result<Vec<String>, IndexError> {
        Ok(self
            .store
            .list_sources()
            .await?
            .into_iter()
            .map(|s| s.source)
            .collect())
    }

    pub async fn list_sources(&self) -> Result<Vec<SourceSummary>, IndexError> {
        self.store.list_sources().await
    }
}
