//! Error taxonomy for the sync core.
//!
//! Each class maps to a recovery policy:
//!
//! | Error | Policy |
//! |-------|--------|
//! | [`LoadError`] | skip the file, log, continue |
//! | [`EmbeddingError`] | retry with backoff if retryable, then skip until the next reconcile |
//! | [`IndexError::Write`] | surface; the old vectors stay in place so a retry is possible |
//! | [`IndexError::Read`] | abort the current reconciliation pass only |

use std::path::PathBuf;

/// A file could not be turned into text.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unsupported file type: {path}")]
    Unsupported { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt or unreadable document {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("{path} is not valid UTF-8 text")]
    Encoding { path: PathBuf },
}

impl LoadError {
    pub fn path(&self) -> &PathBuf {
        match self {
            LoadError::Unsupported { path }
            | LoadError::Io { path, .. }
            | LoadError::Corrupt { path, .. }
            | LoadError::Encoding { path } => path,
        }
    }

    /// True when the file disappeared between the event and the read.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LoadError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// The embedding collaborator failed.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// Timeouts, rate limits, 5xx responses and connection failures.
    #[error("transient embedding failure: {0}")]
    Retryable(String),

    #[error("embedding failed: {0}")]
    Fatal(String),
}

impl EmbeddingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::Retryable(_))
    }
}

/// The vector store rejected a read or a write.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index write failed: {0}")]
    Write(String),

    #[error("index read failed: {0}")]
    Read(String),
}

impl IndexError {
    pub fn write(err: impl std::fmt::Display) -> Self {
        IndexError::Write(err.to_string())
    }

    pub fn read(err: impl std::fmt::Display) -> Self {
        IndexError::Read(err.to_string())
    }
}

/// Failure while ingesting a single file.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    IndexWrite(#[from] IndexError),
}
