//! Filesystem watcher.
//!
//! Bridges `notify` callbacks into the async [`SyncEngine`]:
//!
//! ```text
//! notify thread ──classify──► filter ──try_send──► bounded mpsc ──► dispatcher task ──► SyncEngine::handle_event
//! ```
//!
//! The callback never blocks. When the queue is full the event is dropped
//! with a warning and the next reconciliation pass repairs the gap. The
//! dispatcher applies events one at a time in arrival order.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::event::{MetadataKind, ModifyKind, RenameMode};
use notify::{
    Config as NotifyConfig, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode,
    Watcher,
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{WatchBackend, WatchConfig};
use crate::sync::SyncEngine;

/// A filesystem change the sync engine understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Created or modified; (re)ingest.
    Upsert(PathBuf),
    /// Deleted; drop its vectors.
    Remove(PathBuf),
    Rename { from: PathBuf, to: PathBuf },
}

/// Map a raw `notify` event to zero or more [`WatchEvent`]s.
///
/// Access events and metadata changes other than the modification time are
/// dropped. Ambiguous kinds are resolved by checking whether the path exists.
pub fn classify(event: &Event) -> Vec<WatchEvent> {
    let by_existence = |paths: &[PathBuf]| -> Vec<WatchEvent> {
        paths
            .iter()
            .map(|p| {
                if p.exists() {
                    WatchEvent::Upsert(p.clone())
                } else {
                    WatchEvent::Remove(p.clone())
                }
            })
            .collect()
    };

    match &event.kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(_) => event.paths.iter().cloned().map(WatchEvent::Upsert).collect(),
        EventKind::Remove(_) => event.paths.iter().cloned().map(WatchEvent::Remove).collect(),
        EventKind::Modify(kind) => match kind {
            ModifyKind::Data(_) | ModifyKind::Any | ModifyKind::Other => {
                event.paths.iter().cloned().map(WatchEvent::Upsert).collect()
            }
            ModifyKind::Metadata(MetadataKind::WriteTime) => {
                event.paths.iter().cloned().map(WatchEvent::Upsert).collect()
            }
            ModifyKind::Metadata(_) => Vec::new(),
            ModifyKind::Name(RenameMode::Both) if event.paths.len() == 2 => {
                vec![WatchEvent::Rename {
                    from: event.paths[0].clone(),
                    to: event.paths[1].clone(),
                }]
            }
            ModifyKind::Name(RenameMode::From) => {
                event.paths.iter().cloned().map(WatchEvent::Remove).collect()
            }
            ModifyKind::Name(RenameMode::To) => {
                event.paths.iter().cloned().map(WatchEvent::Upsert).collect()
            }
            ModifyKind::Name(_) => by_existence(&event.paths),
        },
        EventKind::Any | EventKind::Other => by_existence(&event.paths),
    }
}

/// Observable lifecycle of a [`DirectoryWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Idle,
    Watching,
    /// An event is being applied to the index.
    Dispatching,
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub backend: WatchBackend,
    pub poll_interval: Duration,
    pub recursive: bool,
    pub queue_capacity: usize,
}

impl WatcherSettings {
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            backend: config.backend,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            recursive: config.recursive,
            queue_capacity: config.queue_capacity,
        }
    }
}

pub struct DirectoryWatcher {
    watcher: Option<Box<dyn Watcher + Send>>,
    dispatcher: Option<JoinHandle<()>>,
    state_tx: Arc<watch::Sender<WatcherState>>,
}

fn relevant(engine: &SyncEngine, event: &WatchEvent) -> bool {
    match event {
        WatchEvent::Upsert(p) | WatchEvent::Remove(p) => engine.is_eligible(p),
        WatchEvent::Rename { from, to } => engine.is_eligible(from) || engine.is_eligible(to),
    }
}

fn enqueue(tx: &mpsc::Sender<WatchEvent>, event: WatchEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(dropped)) => {
            tracing::warn!(event = ?dropped, "event queue full, dropping; reconcile will catch up");
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

impl DirectoryWatcher {
    /// Begin watching `engine.root()`. Must be called inside a tokio runtime.
    pub fn start(engine: Arc<SyncEngine>, settings: WatcherSettings) -> Result<Self> {
        let (tx, mut rx) = mpsc::channel::<WatchEvent>(settings.queue_capacity.max(1));
        let (state_tx, _) = watch::channel(WatcherState::Idle);
        let state_tx = Arc::new(state_tx);

        let filter_engine = Arc::clone(&engine);
        let handler = move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for ev in classify(&event) {
                    if relevant(&filter_engine, &ev) {
                        enqueue(&tx, ev);
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "watch error"),
        };

        let mut watcher: Box<dyn Watcher + Send> = match settings.backend {
            WatchBackend::Poll => Box::new(
                PollWatcher::new(
                    handler,
                    NotifyConfig::default().with_poll_interval(settings.poll_interval),
                )
                .context("Failed to create polling watcher")?,
            ),
            WatchBackend::Native => Box::new(
                RecommendedWatcher::new(handler, NotifyConfig::default())
                    .context("Failed to create native watcher")?,
            ),
        };

        let mode = if settings.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(engine.root(), mode)
            .with_context(|| format!("Failed to watch {}", engine.root().display()))?;

        state_tx.send_replace(WatcherState::Watching);
        tracing::info!(
            root = %engine.root().display(),
            backend = ?settings.backend,
            "watching"
        );

        let dispatch_state = Arc::clone(&state_tx);
        let dispatcher = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                dispatch_state.send_replace(WatcherState::Dispatching);
                let outcome = engine.handle_event(event).await;
                tracing::debug!(?outcome, "event applied");
                dispatch_state.send_replace(WatcherState::Watching);
            }
        });

        Ok(Self {
            watcher: Some(watcher),
            dispatcher: Some(dispatcher),
            state_tx,
        })
    }

    pub fn state(&self) -> WatcherState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WatcherState> {
        self.state_tx.subscribe()
    }

    /// Stop watching, let the dispatcher drain queued events, then go idle.
    pub async fn stop(&mut self) {
        // Dropping the watcher drops the queue sender, which ends the dispatcher
        self.watcher.take();
        if let Some(handle) = self.dispatcher.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "dispatcher ended abnormally");
            }
        }
        self.state_tx.send_replace(WatcherState::Idle);
        tracing::info!("watcher stopped");
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};

    fn ev(kind: EventKind, paths: &[&str]) -> Event {
        let mut e = Event::new(kind);
        for p in paths {
            e = e.add_path(PathBuf::from(p));
        }
        e
    }

    #[test]
    fn create_and_write_become_upserts() {
        assert_eq!(
            classify(&ev(EventKind::Create(CreateKind::File), &["/d/a.txt"])),
            vec![WatchEvent::Upsert("/d/a.txt".into())]
        );
        assert_eq!(
            classify(&ev(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/d/a.txt"]
            )),
            vec![WatchEvent::Upsert("/d/a.txt".into())]
        );
        // What PollWatcher emits when only the mtime moved
        assert_eq!(
            classify(&ev(
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)),
                &["/d/a.txt"]
            )),
            vec![WatchEvent::Upsert("/d/a.txt".into())]
        );
    }

    #[test]
    fn access_and_permission_changes_are_ignored() {
        assert!(classify(&ev(EventKind::Access(AccessKind::Any), &["/d/a.txt"])).is_empty());
        assert!(classify(&ev(
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            &["/d/a.txt"]
        ))
        .is_empty());
    }

    #[test]
    fn remove_and_rename_halves() {
        assert_eq!(
            classify(&ev(EventKind::Remove(RemoveKind::File), &["/d/a.txt"])),
            vec![WatchEvent::Remove("/d/a.txt".into())]
        );
        assert_eq!(
            classify(&ev(
                EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                &["/d/a.txt"]
            )),
            vec![WatchEvent::Remove("/d/a.txt".into())]
        );
        assert_eq!(
            classify(&ev(
                EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                &["/d/b.txt"]
            )),
            vec![WatchEvent::Upsert("/d/b.txt".into())]
        );
    }

    #[test]
    fn paired_rename() {
        assert_eq!(
            classify(&ev(
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/d/a.txt", "/d/b.txt"]
            )),
            vec![WatchEvent::Rename {
                from: "/d/a.txt".into(),
                to: "/d/b.txt".into(),
            }]
        );
    }

    #[test]
    fn ambiguous_kinds_resolve_by_existence() {
        let tmp = tempfile::TempDir::new().unwrap();
        let present = tmp.path().join("here.txt");
        std::fs::write(&present, "x").unwrap();
        let absent = tmp.path().join("gone.txt");

        let event = Event::new(EventKind::Any)
            .add_path(present.clone())
            .add_path(absent.clone());
        assert_eq!(
            classify(&event),
            vec![WatchEvent::Upsert(present), WatchEvent::Remove(absent)]
        );
    }
}
