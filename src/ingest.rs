//! Ingestion pipeline.
//!
//! Turns one file into indexed vectors: pick a loader by extension, load on
//! the blocking pool, chunk, embed, and atomically swap the file's vectors.
//! Re-ingesting an unchanged file reproduces the same vector set.
//!
//! ```text
//! path ─► LoaderRegistry ─► LoadedUnit* ─► chunk_units ─► VectorIndex::replace_source
//! ```
//!
//! The same pipeline backs bulk ingest, watcher events and reconciliation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::chunk::{chunk_units, derive_naming, ChunkSettings};
use crate::config::{Config, NamingRule};
use crate::error::{IngestError, LoadError};
use crate::index::VectorIndex;
use crate::loader::LoaderRegistry;
use crate::models::{source_key, ChunkMetadata, SourceDocument};

/// What [`IngestPipeline::ingest_file`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The file produced `chunks` vectors, replacing `replaced` older ones.
    Indexed { chunks: usize, replaced: u64 },
    /// The file had no text (or vanished before it could be read).
    /// `cleared` stale vectors were removed.
    NoChunks { cleared: u64 },
    /// No loader handles this path.
    Unsupported,
}

/// Which paths the pipeline will touch.
#[derive(Debug, Clone)]
pub struct FileFilter {
    exclude: GlobSet,
    recursive: bool,
}

impl FileFilter {
    pub fn new(exclude_globs: &[String], recursive: bool) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude_globs {
            builder.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
        }
        Ok(Self {
            exclude: builder.build()?,
            recursive,
        })
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.exclude.is_match(path) {
            return true;
        }
        path.file_name()
            .map(|name| self.exclude.is_match(Path::new(name)))
            .unwrap_or(false)
    }

    /// Like [`is_excluded`](Self::is_excluded), and also matches the path
    /// relative to `root` so folder globs such as `archive/**` apply.
    pub fn is_excluded_under(&self, root: &Path, path: &Path) -> bool {
        self.is_excluded(path)
            || path
                .strip_prefix(root)
                .map(|relative| self.exclude.is_match(relative))
                .unwrap_or(false)
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }
}

pub struct IngestPipeline {
    registry: Arc<LoaderRegistry>,
    index: Arc<VectorIndex>,
    settings: ChunkSettings,
    naming: Vec<NamingRule>,
    filter: FileFilter,
}

impl IngestPipeline {
    pub fn new(
        registry: Arc<LoaderRegistry>,
        index: Arc<VectorIndex>,
        settings: ChunkSettings,
        naming: Vec<NamingRule>,
        filter: FileFilter,
    ) -> Self {
        Self {
            registry,
            index,
            settings,
            naming,
            filter,
        }
    }

    pub fn from_config(config: &Config, index: Arc<VectorIndex>) -> Result<Self> {
        Ok(Self::new(
            Arc::new(LoaderRegistry::default()),
            index,
            ChunkSettings::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?,
            config.chunking.naming.clone(),
            FileFilter::new(&config.watch.exclude_globs, config.watch.recursive)?,
        ))
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn registry(&self) -> &LoaderRegistry {
        &self.registry
    }

    pub fn is_recursive(&self) -> bool {
        self.filter.recursive()
    }

    /// Name-based check: supported extension and not excluded. Works for
    /// paths that no longer exist, so delete events can use it.
    pub fn is_eligible(&self, path: &Path) -> bool {
        self.registry.is_supported(path) && !self.filter.is_excluded(path)
    }

    /// [`is_eligible`](Self::is_eligible) for a file inside the directory
    /// `root`. Event handling and directory scans both go through this.
    pub fn is_eligible_under(&self, root: &Path, path: &Path) -> bool {
        self.registry.is_supported(path) && !self.filter.is_excluded_under(root, path)
    }

    /// Load, chunk, embed and replace the vectors of one file.
    ///
    /// Errors leave the file's previous vectors untouched.
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestOutcome, IngestError> {
        let path = absolute(path);
        if !self.registry.is_supported(&path) {
            return Ok(IngestOutcome::Unsupported);
        }

        let doc = SourceDocument::probe(&path).map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;
        if !doc.exists {
            if path.is_dir() {
                return Ok(IngestOutcome::Unsupported);
            }
            tracing::debug!(path = %path.display(), "file vanished before ingest");
            return Ok(IngestOutcome::NoChunks { cleared: 0 });
        }

        let units = match self.load_blocking(&path).await {
            Ok(units) => units,
            Err(e) if e.is_not_found() => {
                tracing::debug!(path = %path.display(), "file vanished during load");
                return Ok(IngestOutcome::NoChunks { cleared: 0 });
            }
            Err(e) => return Err(e.into()),
        };

        let source = doc.source_key();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let (category, topic) = derive_naming(&file_name, &self.naming);
        let base = ChunkMetadata {
            source: source.clone(),
            category,
            topic,
            modified_ms: doc.modified_ms,
            ..Default::default()
        };

        let chunks = chunk_units(&units, self.settings, &base);
        if chunks.is_empty() {
            let cleared = self.index.delete_by_source(&source).await?;
            tracing::info!(source = %source, cleared, "no text extracted");
            return Ok(IngestOutcome::NoChunks { cleared });
        }

        let outcome = self.index.replace_source(&source, &chunks).await?;
        tracing::info!(
            source = %source,
            chunks = outcome.inserted,
            replaced = outcome.deleted,
            "indexed"
        );
        Ok(IngestOutcome::Indexed {
            chunks: chunks.len(),
            replaced: outcome.deleted,
        })
    }

    async fn load_blocking(&self, path: &Path) -> Result<Vec<crate::loader::LoadedUnit>, LoadError> {
        let registry = Arc::clone(&self.registry);
        let owned = path.to_path_buf();
        let joined = tokio::task::spawn_blocking(move || match registry.loader_for_path(&owned) {
            Some(loader) => loader.load(&owned),
            None => Err(LoadError::Unsupported { path: owned }),
        })
        .await;

        joined.map_err(|e| LoadError::Corrupt {
            path: path.to_path_buf(),
            message: format!("loader aborted: {}", e),
        })?
    }

    /// Remove every vector of `path`. Returns the number removed.
    pub async fn remove_file(&self, path: &Path) -> Result<u64, IngestError> {
        let source = source_key(&absolute(path));
        let removed = self.index.delete_by_source(&source).await?;
        tracing::info!(source = %source, removed, "removed");
        Ok(removed)
    }

    /// Eligible regular files under `dir`, sorted. Descends into
    /// subdirectories only when the filter is recursive. Symlinks are
    /// followed but keep their own path as the source key.
    pub fn list_supported_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            bail!("Directory does not exist: {}", dir.display());
        }
        let max_depth = if self.filter.recursive() { usize::MAX } else { 1 };

        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .follow_links(true)
            .min_depth(1)
            .max_depth(max_depth) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // Entries can vanish between readdir and stat
                    tracing::debug!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if self.is_eligible_under(dir, path) {
                files.push(absolute(path));
            }
        }
        files.sort();
        Ok(files)
    }

    /// Ingest every eligible file in `dir`. Per-file failures are recorded in
    /// the report, not returned.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<IngestReport> {
        let files = self.list_supported_files(dir)?;
        let mut report = IngestReport::default();

        for path in files {
            let status = match self.ingest_file(&path).await {
                Ok(IngestOutcome::Indexed { chunks, .. }) => FileStatus::Indexed(chunks),
                Ok(IngestOutcome::NoChunks { .. }) => FileStatus::NoChunks,
                Ok(IngestOutcome::Unsupported) => FileStatus::Skipped("unsupported".to_string()),
                Err(IngestError::Load(e)) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping file");
                    FileStatus::Skipped(e.to_string())
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "ingest failed");
                    FileStatus::Failed(e.to_string())
                }
            };
            report.files.push(FileReport { path, status });
        }
        Ok(report)
    }
}

/// `ragsync ingest`: bulk-load `dir` (or the watched directory) into the
/// configured index and print a summary.
pub async fn run_ingest(config: &Config, dir: Option<PathBuf>) -> Result<()> {
    let dir = dir.unwrap_or_else(|| config.watch.dir.clone());
    let dir = dir
        .canonicalize()
        .with_context(|| format!("Directory does not exist: {}", dir.display()))?;
    if !dir.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }

    let index = Arc::new(VectorIndex::open(config).await?);
    let pipeline = IngestPipeline::from_config(config, index)?;

    let report = pipeline.ingest_directory(&dir).await?;
    println!("ingest {}", dir.display());
    if report.files.is_empty() {
        println!(
            "  no supported files (looking for {})",
            pipeline.registry().supported_extensions().join(" ")
        );
        println!("ok");
        return Ok(());
    }

    for file in &report.files {
        match &file.status {
            FileStatus::Skipped(reason) => {
                println!("  skipped: {} ({})", file.path.display(), reason)
            }
            FileStatus::Failed(reason) => {
                println!("  failed: {} ({})", file.path.display(), reason)
            }
            FileStatus::Indexed(_) | FileStatus::NoChunks => {}
        }
    }
    println!("  files: {}", report.files.len());
    println!("  indexed: {}", report.indexed());
    println!("  empty: {}", report.empty());
    println!("  chunks written: {}", report.total_chunks());
    if report.skipped() > 0 || report.failed() > 0 {
        println!("  skipped: {}", report.skipped());
        println!("  failed: {}", report.failed());
    }
    println!("ok");
    Ok(())
}

/// Absolute form of `path` without resolving symlinks, so the key of a
/// deleted file matches the key it was indexed under.
pub fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Indexed(usize),
    NoChunks,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub path: PathBuf,
    pub status: FileStatus,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub files: Vec<FileReport>,
}

impl IngestReport {
    pub fn indexed(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Indexed(_)))
    }

    pub fn empty(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::NoChunks))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, FileStatus::Failed(_)))
    }

    pub fn total_chunks(&self) -> usize {
        self.files
            .iter()
            .map(|f| match f.status {
                FileStatus::Indexed(n) => n,
                _ => 0,
            })
            .sum()
    }

    fn count(&self, pred: impl Fn(&FileStatus) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.status)).count()
    }
}
