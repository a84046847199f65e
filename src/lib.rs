//! # ragsync
//!
//! Keeps a vector index in step with a directory of documents.
//!
//! Files dropped into the watched directory are loaded by format, split into
//! overlapping chunks, embedded, and stored with their path as the `source`
//! key. Edits re-ingest, deletes remove, and a periodic reconciliation pass
//! repairs anything the watcher missed. Retrieval runs concurrently against
//! the same index.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌──────────────┐   ┌────────────┐
//! │  Watcher   │──▶│ Sync Engine │──▶│   Ingest     │──▶│   Vector   │
//! │ notify     │   │ events +    │   │ load, chunk, │   │   Index    │
//! └────────────┘   │ reconcile   │   │ embed        │   │  (SQLite)  │
//!                  └─────────────┘   └──────────────┘   └─────┬──────┘
//!                                                             │
//!                                          search / sources ◀─┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragsync --config ./config/ragsync.toml init
//! ragsync --config ./config/ragsync.toml ingest
//! ragsync --config ./config/ragsync.toml watch
//! ragsync --config ./config/ragsync.toml search "when is trash pickup"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed error taxonomy |
//! | [`chunk`] | Recursive character splitting |
//! | [`extract`] | Format decoders (PDF, DOC, DOCX, XLSX, HTML, EML, TXT) |
//! | [`loader`] | Loader registry keyed by extension |
//! | [`embedding`] | Embedding providers and retry |
//! | [`store`] | Storage trait and in-memory backend |
//! | [`sqlite_store`] | SQLite storage backend |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`index`] | Vector index client |
//! | [`ingest`] | Ingestion pipeline |
//! | [`watcher`] | Filesystem watcher |
//! | [`sync`] | Event handling and reconciliation |
//! | [`search`] | Similarity search command |
//! | [`sources`] | Source discovery commands |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod search;
pub mod sources;
pub mod sqlite_store;
pub mod store;
pub mod sync;
pub mod watcher;
