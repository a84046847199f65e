//! End-to-end watcher tests using the polling backend.

use std::fs;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ragsync::chunk::ChunkSettings;
use ragsync::config::WatchBackend;
use ragsync::embedding::{HashEmbedder, RetryPolicy};
use ragsync::index::VectorIndex;
use ragsync::ingest::{FileFilter, IngestPipeline};
use ragsync::loader::LoaderRegistry;
use ragsync::store::memory::InMemoryStore;
use ragsync::sync::SyncEngine;
use ragsync::watcher::{DirectoryWatcher, WatcherSettings, WatcherState};
use tempfile::TempDir;

fn engine(dir: &std::path::Path) -> Arc<SyncEngine> {
    let index = VectorIndex::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(HashEmbedder::new(32)),
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
        },
        8,
    );
    let pipeline = IngestPipeline::new(
        Arc::new(LoaderRegistry::default()),
        Arc::new(index),
        ChunkSettings::new(1000, 200).unwrap(),
        Vec::new(),
        FileFilter::new(&["**/.*".to_string()], false).unwrap(),
    );
    Arc::new(SyncEngine::new(dir, Arc::new(pipeline)).unwrap())
}

fn poll_settings() -> WatcherSettings {
    WatcherSettings {
        backend: WatchBackend::Poll,
        poll_interval: Duration::from_millis(50),
        recursive: false,
        queue_capacity: 64,
    }
}

/// Re-check `probe` until it holds or ten seconds pass.
async fn eventually<F, Fut>(mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if probe().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Probe that holds once the index lists exactly `expected`.
fn sources_are(
    engine: &Arc<SyncEngine>,
    expected: Vec<String>,
) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = bool> + Send>> {
    let engine = engine.clone();
    move || {
        let engine = engine.clone();
        let expected = expected.clone();
        Box::pin(async move { sources(&engine).await == expected })
    }
}

async fn sources(engine: &SyncEngine) -> Vec<String> {
    engine
        .pipeline()
        .index()
        .list_distinct_sources()
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_modify_delete_follow_the_directory() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(tmp.path());
    let path = engine.root().join("hours.txt");
    let key = path.to_string_lossy().to_string();

    let mut watcher = DirectoryWatcher::start(engine.clone(), poll_settings()).unwrap();
    assert_ne!(watcher.state(), WatcherState::Idle);

    fs::write(&path, "City hall is open nine to five.").unwrap();
    assert!(
        eventually(sources_are(&engine, vec![key.clone()])).await,
        "created file was never indexed"
    );

    // Different length so the poller sees a change even with coarse mtimes
    fs::write(&path, "City hall is open ten to four on weekdays.").unwrap();
    let index = engine.pipeline().index().clone();
    assert!(
        eventually(move || {
            let index = index.clone();
            async move {
                index
                    .similarity_search("", 10, None)
                    .await
                    .map(|hits| hits.len() == 1 && hits[0].content.contains("ten to four"))
                    .unwrap_or(false)
            }
        })
        .await,
        "modification was never applied"
    );

    fs::remove_file(&path).unwrap();
    assert!(
        eventually(sources_are(&engine, Vec::new())).await,
        "deleted file kept its vectors"
    );

    watcher.stop().await;
    assert_eq!(watcher.state(), WatcherState::Idle);
    assert_eq!(engine.stats().events_failed, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ineligible_files_never_reach_the_index() {
    let tmp = TempDir::new().unwrap();
    let engine = engine(tmp.path());
    let mut watcher = DirectoryWatcher::start(engine.clone(), poll_settings()).unwrap();

    fs::write(engine.root().join("photo.png"), [0u8; 16]).unwrap();
    fs::write(engine.root().join(".hidden.txt"), "secret").unwrap();
    fs::write(engine.root().join("visible.txt"), "Recycling is collected weekly.").unwrap();

    let visible = engine.root().join("visible.txt").to_string_lossy().to_string();
    assert!(eventually(sources_are(&engine, vec![visible.clone()])).await);

    // Give the poller a few more rounds to surface anything it should not
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sources(&engine).await, vec![visible]);

    watcher.stop().await;
}
