//! In-memory [`Store`] implementation for tests and ephemeral indexes.
//!
//! All records live in one `Vec` behind `std::sync::RwLock`. Mutations take
//! the write lock once, so a replacement is never observed half-applied.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::models::{IndexedVector, SourceSummary};

use super::{MetadataFilter, ReplaceOutcome, Store};

#[derive(Default)]
pub struct InMemoryStore {
    vectors: RwLock<Vec<IndexedVector>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.vectors.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> IndexError {
    IndexError::Write("in-memory store lock poisoned".to_string())
}

/// Reject records whose IDs collide with each other or with `existing`.
fn check_unique<'a>(
    existing: impl Iterator<Item = &'a IndexedVector>,
    records: &[IndexedVector],
) -> Result<(), IndexError> {
    let mut seen: HashSet<&str> = existing.map(|v| v.vector_id.as_str()).collect();
    for r in records {
        if !seen.insert(r.vector_id.as_str()) {
            return Err(IndexError::Write(format!(
                "duplicate vector_id {} for {}",
                r.vector_id, r.source
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert(&self, records: &[IndexedVector]) -> Result<(), IndexError> {
        let mut vectors = self.vectors.write().map_err(poisoned)?;
        check_unique(vectors.iter(), records)?;
        vectors.extend_from_slice(records);
        Ok(())
    }

    async fn delete_by_source(&self, source: &str) -> Result<u64, IndexError> {
        let mut vectors = self.vectors.write().map_err(poisoned)?;
        let before = vectors.len();
        vectors.retain(|v| v.source != source);
        Ok((before - vectors.len()) as u64)
    }

    async fn replace_source(
        &self,
        source: &str,
        records: &[IndexedVector],
    ) -> Result<ReplaceOutcome, IndexError> {
        let mut vectors = self.vectors.write().map_err(poisoned)?;
        check_unique(vectors.iter().filter(|v| v.source != source), records)?;
        let before = vectors.len();
        vectors.retain(|v| v.source != source);
        let deleted = (before - vectors.len()) as u64;
        vectors.extend_from_slice(records);
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
        let vectors = self
            .vectors
            .read()
            .map_err(|_| IndexError::Read("in-memory store lock poisoned".to_string()))?;
        let mut out: Vec<IndexedVector> = vectors
            .iter()
            .filter(|v| filter.matches(&v.metadata))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.source
                .cmp(&b.source)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn list_sources(&self) -> Result<Vec<SourceSummary>, IndexError> {
        let vectors = self
            .vectors
            .read()
            .map_err(|_| IndexError::Read("in-memory store lock poisoned".to_string()))?;
        let mut by_source: BTreeMap<&str, SourceSummary> = BTreeMap::new();
        for v in vectors.iter() {
            let entry = by_source
                .entry(v.source.as_str())
                .or_insert_with(|| SourceSummary {
                    source: v.source.clone(),
                    vectors: 0,
                    modified_ms: None,
                });
            entry.vectors += 1;
            entry.modified_ms = entry.modified_ms.max(v.metadata.modified_ms);
        }
        Ok(by_source.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn record(source: &str, index: i64) -> IndexedVector {
        let mut metadata = ChunkMetadata::for_source(source);
        metadata.modified_ms = Some(1000 + index);
        IndexedVector {
            vector_id: format!("{}#{}", source, index),
            source: source.to_string(),
            chunk_index: index,
            content: format!("chunk {} of {}", index, source),
            metadata,
            embedding: vec![1.0, 0.0],
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_ids_atomically() {
        let store = InMemoryStore::new();
        store.insert(&[record("/a", 0)]).await.unwrap();
        let err = store
            .insert(&[record("/b", 0), record("/a", 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Write(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn replace_swaps_one_source_only() {
        let store = InMemoryStore::new();
        store
            .insert(&[record("/a", 0), record("/a", 1), record("/b", 0)])
            .await
            .unwrap();

        let outcome = store.replace_source("/a", &[record("/a", 0)]).await.unwrap();
        assert_eq!(outcome, ReplaceOutcome { deleted: 2, inserted: 1 });

        let all = store.fetch(&MetadataFilter::new(), None).await.unwrap();
        let keys: Vec<_> = all.iter().map(|v| (v.source.as_str(), v.chunk_index)).collect();
        assert_eq!(keys, vec![("/a", 0), ("/b", 0)]);
    }

    #[tokio::test]
    async fn list_sources_counts_and_tracks_mtime() {
        let store = InMemoryStore::new();
        store
            .insert(&[record("/b", 0), record("/a", 0), record("/a", 1)])
            .await
            .unwrap();
        let sources = store.list_sources().await.unwrap();
        assert_eq!(
            sources,
            vec![
                SourceSummary { source: "/a".into(), vectors: 2, modified_ms: Some(1001) },
                SourceSummary { source: "/b".into(), vectors: 1, modified_ms: Some(1000) },
            ]
        );
        assert_eq!(store.delete_by_source("/a").await.unwrap(), 2);
        assert_eq!(store.delete_by_source("/a").await.unwrap(), 0);
    }
}
