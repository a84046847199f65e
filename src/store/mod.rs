//! Storage abstraction for the vector index.
//!
//! The [`Store`] trait is the persistence seam under
//! [`VectorIndex`](crate::index::VectorIndex): it stores and returns
//! already-embedded vectors and knows nothing about embedding or ranking.
//! One store instance serves exactly one collection.
//!
//! Two backends exist:
//! - [`SqliteStore`](crate::sqlite_store::SqliteStore): durable, WAL-mode SQLite.
//! - [`memory::InMemoryStore`]: `RwLock`-guarded, for tests and ephemeral runs.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::models::{ChunkMetadata, IndexedVector, SourceSummary};

/// Exact-match conjunction over metadata keys.
///
/// An empty filter matches everything. The `source` key is matched against
/// the indexed column by SQL backends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    conditions: BTreeMap<String, String>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(source: impl Into<String>) -> Self {
        Self::new().eq("source", source)
    }

    /// Require `key == value`. A later call for the same key replaces it.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.conditions.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.conditions
            .iter()
            .all(|(k, v)| metadata.get(k).as_deref() == Some(v.as_str()))
    }
}

/// Row counts from an atomic per-source swap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub deleted: u64,
    pub inserted: u64,
}

/// Abstract vector storage for one collection.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](Store::insert) | append records; a duplicate `vector_id` fails the whole call |
/// | [`delete_by_source`](Store::delete_by_source) | remove every record of a source |
/// | [`replace_source`](Store::replace_source) | delete + insert as one atomic unit |
/// | [`fetch`](Store::fetch) | filtered records ordered by `(source, chunk_index)` |
/// | [`list_sources`](Store::list_sources) | distinct sources with counts |
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert(&self, records: &[IndexedVector]) -> Result<(), IndexError>;

    /// Returns the number of records removed. Deleting an unknown source is
    /// not an error.
    async fn delete_by_source(&self, source: &str) -> Result<u64, IndexError>;

    /// Swap every record of `source` for `records`. Readers observe either
    /// the old set or the new set, never a mix.
    async fn replace_source(
        &self,
        source: &str,
        records: &[IndexedVector],
    ) -> Result<ReplaceOutcome, IndexError>;

    async fn fetch(
        &self,
        filter: &MetadataFilter,
        limit: Option<usize>,
    ) -> Result<Vec<IndexedVector>, IndexError>;

    /// Distinct sources, sorted, with vector counts and the newest recorded
    /// file modification time.
    async fn list_sources(&self) -> Result<Vec<SourceSummary>, IndexError>;
}
