//! Sync engine: keeps the index consistent with the watched directory.
//!
//! Two paths mutate the index:
//!
//! - **Events.** [`SyncEngine::handle_event`] applies one watcher event:
//!   upsert re-ingests the file, remove deletes its vectors, rename does both.
//! - **Reconciliation.** [`SyncEngine::reconcile`] diffs the indexed sources
//!   against a directory listing and repairs drift: deletions the watcher
//!   missed, files that were never indexed, and files modified since they
//!   were embedded.
//!
//! Both take the same per-engine gate around each single-file mutation, so
//! an event and a reconciliation step never interleave on one source.
//! Queries never take the gate.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};

use crate::config::Config;
use crate::error::{IndexError, IngestError};
use crate::index::VectorIndex;
use crate::ingest::{IngestOutcome, IngestPipeline};
use crate::models::{source_key, SourceDocument};
use crate::watcher::{DirectoryWatcher, WatchEvent, WatcherSettings};

/// Result of applying one [`WatchEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Indexed { chunks: usize },
    Emptied { cleared: u64 },
    Removed { vectors: u64 },
    Renamed { removed: u64, chunks: usize },
    /// Path not eligible (unsupported, excluded, or a directory).
    Ignored,
    Failed(String),
}

/// Per-pass summary of [`SyncEngine::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Sources deleted because their file is gone.
    pub removed_sources: Vec<String>,
    pub removed_vectors: u64,
    /// Files on disk that had no vectors and were ingested.
    pub added: Vec<PathBuf>,
    /// Files whose modification time changed since they were embedded.
    pub refreshed: Vec<PathBuf>,
    /// Indexed files that needed nothing.
    pub unchanged: usize,
    pub failures: Vec<(PathBuf, String)>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.removed_sources.is_empty()
            && self.added.is_empty()
            && self.refreshed.is_empty()
            && self.failures.is_empty()
    }
}

/// A reconciliation pass could not run.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("cannot list watched directory: {0}")]
    Listing(String),
}

/// Counters since the engine started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub events_applied: u64,
    pub events_failed: u64,
    pub reconciles: u64,
    pub reconciles_aborted: u64,
    pub last_reconcile: Option<DateTime<Utc>>,
}

pub struct SyncEngine {
    root: PathBuf,
    pipeline: Arc<IngestPipeline>,
    gate: Mutex<()>,
    stats: std::sync::Mutex<SyncStats>,
}

impl SyncEngine {
    /// The watched directory must exist; it is canonicalised once here and
    /// every source key is derived from that form.
    pub fn new(root: &Path, pipeline: Arc<IngestPipeline>) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Watched directory does not exist: {}", root.display()))?;
        if !root.is_dir() {
            anyhow::bail!("Watched path is not a directory: {}", root.display());
        }
        Ok(Self {
            root,
            pipeline,
            gate: Mutex::new(()),
            stats: std::sync::Mutex::new(SyncStats::default()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pipeline(&self) -> &Arc<IngestPipeline> {
        &self.pipeline
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn record(&self, f: impl FnOnce(&mut SyncStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    /// Supported and not excluded, with exclusion globs also matched relative
    /// to the watched root, exactly as reconciliation's listing does.
    pub fn is_eligible(&self, path: &Path) -> bool {
        self.pipeline.is_eligible_under(&self.root, path)
    }

    /// Whether `path` belongs to the watched tree and passes the filters.
    fn in_scope(&self, path: &Path) -> bool {
        let inside = if self.pipeline.is_recursive() {
            path.starts_with(&self.root)
        } else {
            path.parent() == Some(self.root.as_path())
        };
        inside && self.is_eligible(path)
    }

    /// Apply one event. Failures are logged and counted, never returned.
    pub async fn handle_event(&self, event: WatchEvent) -> EventOutcome {
        let outcome = match event {
            WatchEvent::Upsert(path) => {
                if !self.is_eligible(&path) {
                    return EventOutcome::Ignored;
                }
                let _guard = self.gate.lock().await;
                self.upsert(&path).await
            }
            WatchEvent::Remove(path) => {
                if !self.is_eligible(&path) {
                    return EventOutcome::Ignored;
                }
                let _guard = self.gate.lock().await;
                match self.pipeline.remove_file(&path).await {
                    Ok(vectors) => EventOutcome::Removed { vectors },
                    Err(e) => failed(&path, e),
                }
            }
            WatchEvent::Rename { from, to } => {
                let from_ok = self.is_eligible(&from);
                let to_ok = self.is_eligible(&to);
                if !from_ok && !to_ok {
                    return EventOutcome::Ignored;
                }
                let _guard = self.gate.lock().await;
                let removed = if from_ok {
                    match self.pipeline.remove_file(&from).await {
                        Ok(n) => n,
                        Err(e) => {
                            self.record(|s| s.events_failed += 1);
                            return failed(&from, e);
                        }
                    }
                } else {
                    0
                };
                if !to_ok {
                    EventOutcome::Removed { vectors: removed }
                } else {
                    match self.upsert(&to).await {
                        EventOutcome::Indexed { chunks } => EventOutcome::Renamed { removed, chunks },
                        EventOutcome::Emptied { cleared } => EventOutcome::Removed {
                            vectors: removed + cleared,
                        },
                        EventOutcome::Ignored => EventOutcome::Removed { vectors: removed },
                        other => other,
                    }
                }
            }
        };

        match &outcome {
            EventOutcome::Failed(_) => self.record(|s| s.events_failed += 1),
            EventOutcome::Ignored => {}
            _ => self.record(|s| s.events_applied += 1),
        }
        outcome
    }

    async fn upsert(&self, path: &Path) -> EventOutcome {
        match self.pipeline.ingest_file(path).await {
            Ok(IngestOutcome::Indexed { chunks, .. }) => EventOutcome::Indexed { chunks },
            Ok(IngestOutcome::NoChunks { cleared }) => EventOutcome::Emptied { cleared },
            Ok(IngestOutcome::Unsupported) => EventOutcome::Ignored,
            Err(e) => failed(path, e),
        }
    }

    /// One drift-repair pass over the whole directory.
    ///
    /// The index is snapshotted before the directory, so a file created
    /// between the two reads is picked up as "added" rather than missed. A
    /// source is only deleted after re-checking that its file is really gone.
    pub async fn reconcile(&self) -> Result<ReconcileReport, ReconcileError> {
        let result = self.reconcile_pass().await;
        match &result {
            Ok(report) => {
                self.record(|s| {
                    s.reconciles += 1;
                    s.last_reconcile = Some(Utc::now());
                });
                if report.is_noop() {
                    tracing::debug!(unchanged = report.unchanged, "reconcile: in sync");
                } else {
                    tracing::info!(
                        removed = report.removed_sources.len(),
                        added = report.added.len(),
                        refreshed = report.refreshed.len(),
                        failed = report.failures.len(),
                        "reconcile: repaired drift"
                    );
                }
            }
            Err(e) => {
                self.record(|s| s.reconciles_aborted += 1);
                tracing::error!(error = %e, "reconcile aborted");
            }
        }
        result
    }

    async fn reconcile_pass(&self) -> Result<ReconcileReport, ReconcileError> {
        let indexed: BTreeMap<String, Option<i64>> = self
            .pipeline
            .index()
            .list_sources()
            .await?
            .into_iter()
            .map(|s| (s.source, s.modified_ms))
            .collect();

        let files = self
            .pipeline
            .list_supported_files(&self.root)
            .map_err(|e| ReconcileError::Listing(e.to_string()))?;
        let on_disk: BTreeSet<String> = files.iter().map(|p| source_key(p)).collect();

        let mut report = ReconcileReport::default();

        for source in indexed.keys().filter(|s| !on_disk.contains(*s)) {
            let path = PathBuf::from(source);
            let _guard = self.gate.lock().await;
            if path.is_file() && self.in_scope(&path) {
                // Reappeared after the listing; the event path owns it now
                continue;
            }
            match self.pipeline.index().delete_by_source(source).await {
                Ok(n) => {
                    tracing::info!(source = %source, vectors = n, "reconcile: removed orphan");
                    report.removed_vectors += n;
                    report.removed_sources.push(source.clone());
                }
                Err(e) => report.failures.push((path, e.to_string())),
            }
        }

        for path in files {
            let key = source_key(&path);
            let refresh = match indexed.get(&key) {
                None => false,
                Some(recorded) => {
                    let current = SourceDocument::probe(&path).ok().and_then(|d| d.modified_ms);
                    if current.is_some() && current == *recorded {
                        report.unchanged += 1;
                        continue;
                    }
                    true
                }
            };

            let _guard = self.gate.lock().await;
            match self.pipeline.ingest_file(&path).await {
                Ok(IngestOutcome::Indexed { .. }) => {
                    if refresh {
                        report.refreshed.push(path);
                    } else {
                        report.added.push(path);
                    }
                }
                Ok(IngestOutcome::NoChunks { .. }) | Ok(IngestOutcome::Unsupported) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "reconcile: ingest failed");
                    report.failures.push((path, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Reconcile every `interval` until `shutdown` flips to `true`.
    ///
    /// The first pass runs one full interval after start; callers do their
    /// own startup reconciliation.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Errors are logged and counted inside reconcile
                    let _ = self.reconcile().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("reconciler stopped");
    }
}

/// Build the engine over the configured index and watched directory.
pub async fn open_engine(config: &Config) -> Result<Arc<SyncEngine>> {
    if !config.watch.dir.is_dir() {
        anyhow::bail!("Watched directory does not exist: {}", config.watch.dir.display());
    }
    let index = Arc::new(VectorIndex::open(config).await?);
    let pipeline = Arc::new(IngestPipeline::from_config(config, index)?);
    Ok(Arc::new(SyncEngine::new(&config.watch.dir, pipeline)?))
}

/// `ragsync reconcile`: one pass, then a summary.
pub async fn run_reconcile(config: &Config) -> Result<()> {
    let engine = open_engine(config).await?;
    let report = engine.reconcile().await?;

    println!("reconcile {}", engine.root().display());
    for source in &report.removed_sources {
        println!("  removed: {}", source);
    }
    for path in &report.added {
        println!("  added: {}", path.display());
    }
    for path in &report.refreshed {
        println!("  refreshed: {}", path.display());
    }
    for (path, reason) in &report.failures {
        println!("  failed: {} ({})", path.display(), reason);
    }
    println!("  vectors removed: {}", report.removed_vectors);
    println!("  unchanged: {}", report.unchanged);
    println!("ok");
    Ok(())
}

/// `ragsync watch`: startup reconciliation, then the watcher and the
/// periodic reconciler until Ctrl-C.
pub async fn run_watch(config: &Config) -> Result<()> {
    let engine = open_engine(config).await?;

    if let Err(e) = engine.reconcile().await {
        tracing::warn!(error = %e, "startup reconcile failed; continuing");
    }

    let mut watcher =
        DirectoryWatcher::start(Arc::clone(&engine), WatcherSettings::from_config(&config.watch))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interval = Duration::from_secs(config.watch.reconcile_interval_secs);
    let reconciler = tokio::spawn(Arc::clone(&engine).run(interval, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("shutting down");

    let _ = shutdown_tx.send(true);
    watcher.stop().await;
    if let Err(e) = reconciler.await {
        tracing::warn!(error = %e, "reconciler ended abnormally");
    }

    let stats = engine.stats();
    tracing::info!(
        events = stats.events_applied,
        failed = stats.events_failed,
        reconciles = stats.reconciles,
        "stopped"
    );
    Ok(())
}

fn failed(path: &Path, err: IngestError) -> EventOutcome {
    match &err {
        IngestError::Load(_) => {
            tracing::warn!(path = %path.display(), error = %err, "skipping file")
        }
        _ => tracing::error!(path = %path.display(), error = %err, "sync failed"),
    }
    EventOutcome::Failed(err.to_string())
}
