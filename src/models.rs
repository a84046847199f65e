//! Core data models used throughout the sync core.
//!
//! These types represent the source files, chunks, and stored vectors that
//! flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// A file in the watched directory, keyed by its absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub extension: Option<String>,
    pub modified_ms: Option<i64>,
    pub exists: bool,
}

impl SourceDocument {
    /// Stat `path`. A missing file yields `exists == false` rather than an error.
    pub fn probe(path: &Path) -> std::io::Result<Self> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        match std::fs::metadata(path) {
            Ok(meta) => Ok(Self {
                path: path.to_path_buf(),
                extension,
                modified_ms: meta.modified().ok().and_then(system_time_ms),
                exists: meta.is_file(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self {
                path: path.to_path_buf(),
                extension,
                modified_ms: None,
                exists: false,
            }),
            Err(e) => Err(e),
        }
    }

    /// The `source` metadata value for vectors derived from this file.
    pub fn source_key(&self) -> String {
        source_key(&self.path)
    }
}

pub fn source_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

pub(crate) fn system_time_ms(t: std::time::SystemTime) -> Option<i64> {
    t.duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as i64)
}

/// Provenance attached to every chunk and persisted as `metadata_json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_ms: Option<i64>,
    /// Loader-provided keys such as `sheet` or `subject`.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl ChunkMetadata {
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// Look up a key the way a metadata filter sees it.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "source" => Some(self.source.clone()),
            "category" => self.category.clone(),
            "topic" => self.topic.clone(),
            "modified_ms" => self.modified_ms.map(|m| m.to_string()),
            other => self.extra.get(other).cloned(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_json(json: &str) -> Self {
        serde_json::from_str(json).unwrap_or_default()
    }
}

/// A window of text cut from one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
    pub metadata: ChunkMetadata,
}

/// A persisted chunk with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedVector {
    pub vector_id: String,
    pub source: String,
    pub chunk_index: i64,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

impl IndexedVector {
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        Self {
            vector_id: chunk.id.clone(),
            source: chunk.metadata.source.clone(),
            chunk_index: chunk.chunk_index,
            content: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
            embedding,
        }
    }
}

/// A result from the retrieval path.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub vector_id: String,
    pub source: String,
    pub chunk_index: i64,
    pub content: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity; `None` for empty-query listings.
    pub score: Option<f32>,
}

impl SearchHit {
    pub fn from_vector(v: IndexedVector, score: Option<f32>) -> Self {
        Self {
            vector_id: v.vector_id,
            source: v.source,
            chunk_index: v.chunk_index,
            content: v.content,
            metadata: v.metadata,
            score,
        }
    }
}

/// One distinct `source` value in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub source: String,
    pub vectors: u64,
    /// Modification time of the file when it was last embedded.
    pub modified_ms: Option<i64>,
}
