//! SQLite store against a temporary database file.

use std::sync::Arc;

use ragsync::config::{parse_config, Config};
use ragsync::db;
use ragsync::embedding::HashEmbedder;
use ragsync::embedding::RetryPolicy;
use ragsync::error::IndexError;
use ragsync::index::VectorIndex;
use ragsync::migrate::run_migrations;
use ragsync::models::{ChunkMetadata, IndexedVector};
use ragsync::sqlite_store::SqliteStore;
use ragsync::store::{MetadataFilter, Store};
use tempfile::TempDir;

fn config_in(tmp: &TempDir) -> Config {
    parse_config(&format!(
        r#"
[index]
path = "{}/data/index.sqlite"

[watch]
dir = "{}"
"#,
        tmp.path().display(),
        tmp.path().display()
    ))
    .unwrap()
}

async fn open_store(tmp: &TempDir, collection: &str) -> SqliteStore {
    let config = config_in(tmp);
    let pool = db::connect(&config).await.unwrap();
    run_migrations(&pool).await.unwrap();
    SqliteStore::new(pool, collection)
}

fn record(source: &str, index: i64, text: &str) -> IndexedVector {
    let mut metadata = ChunkMetadata::for_source(source);
    metadata.modified_ms = Some(1_700_000_000_000 + index);
    IndexedVector {
        vector_id: format!("{}#{}", source, index),
        source: source.to_string(),
        chunk_index: index,
        content: text.to_string(),
        metadata,
        embedding: vec![index as f32, 1.0, -0.5],
    }
}

#[tokio::test]
async fn creates_parent_directory_and_round_trips_rows() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "docs").await;
    assert!(tmp.path().join("data/index.sqlite").exists());

    let rows = vec![record("/d/a.txt", 0, "first"), record("/d/a.txt", 1, "second")];
    store.insert(&rows).await.unwrap();

    let fetched = store.fetch(&MetadataFilter::new(), None).await.unwrap();
    assert_eq!(fetched, rows);
}

#[tokio::test]
async fn replace_source_swaps_only_that_source() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "docs").await;
    store
        .insert(&[
            record("/d/a.txt", 0, "a0"),
            record("/d/a.txt", 1, "a1"),
            record("/d/b.txt", 0, "b0"),
        ])
        .await
        .unwrap();

    let outcome = store
        .replace_source("/d/a.txt", &[record("/d/a.txt", 0, "a0 v2")])
        .await
        .unwrap();
    assert_eq!(outcome.deleted, 2);
    assert_eq!(outcome.inserted, 1);

    let a = store
        .fetch(&MetadataFilter::source("/d/a.txt"), None)
        .await
        .unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(a[0].content, "a0 v2");
    assert_eq!(
        store.fetch(&MetadataFilter::source("/d/b.txt"), None).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn failed_replace_rolls_back_the_delete() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "docs").await;
    store.insert(&[record("/d/a.txt", 0, "keep me")]).await.unwrap();

    // Two rows with one ID: the second insert violates the primary key
    let dup = record("/d/a.txt", 0, "new");
    let err = store
        .replace_source("/d/a.txt", &[dup.clone(), dup])
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::Write(_)));

    let rows = store.fetch(&MetadataFilter::new(), None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content, "keep me");
}

#[tokio::test]
async fn metadata_filters_use_json_fields() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "docs").await;

    let mut parks = record("/d/bedford_parks.txt", 0, "parks");
    parks.metadata.category = Some("bedford_information".into());
    parks.metadata.topic = Some("parks".into());
    let mut sheet = record("/d/budget.xlsx", 0, "budget");
    sheet.metadata.extra.insert("sheet".into(), "FY25".into());
    store.insert(&[parks, sheet]).await.unwrap();

    let by_topic = store
        .fetch(&MetadataFilter::new().eq("topic", "parks"), None)
        .await
        .unwrap();
    assert_eq!(by_topic.len(), 1);
    assert_eq!(by_topic[0].source, "/d/bedford_parks.txt");

    let by_sheet = store
        .fetch(&MetadataFilter::new().eq("sheet", "FY25"), None)
        .await
        .unwrap();
    assert_eq!(by_sheet.len(), 1);

    let by_modified = store
        .fetch(
            &MetadataFilter::new().eq("modified_ms", "1700000000000"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(by_modified.len(), 2);

    let none = store
        .fetch(&MetadataFilter::new().eq("topic", "roads"), None)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn list_sources_groups_and_keeps_latest_mtime() {
    let tmp = TempDir::new().unwrap();
    let store = open_store(&tmp, "docs").await;
    store
        .insert(&[
            record("/d/b.txt", 0, "b0"),
            record("/d/a.txt", 0, "a0"),
            record("/d/a.txt", 1, "a1"),
        ])
        .await
        .unwrap();

    let sources = store.list_sources().await.unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].source, "/d/a.txt");
    assert_eq!(sources[0].vectors, 2);
    assert_eq!(sources[0].modified_ms, Some(1_700_000_000_001));
    assert_eq!(sources[1].source, "/d/b.txt");
}

#[tokio::test]
async fn collections_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let docs = open_store(&tmp, "docs").await;
    let other = open_store(&tmp, "other").await;

    docs.insert(&[record("/d/a.txt", 0, "a")]).await.unwrap();
    assert!(other.list_sources().await.unwrap().is_empty());
    assert_eq!(other.delete_by_source("/d/a.txt").await.unwrap(), 0);
    assert_eq!(docs.list_sources().await.unwrap().len(), 1);
}

#[tokio::test]
async fn vector_index_over_sqlite_searches() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(open_store(&tmp, "docs").await);
    let index = VectorIndex::new(store, Arc::new(HashEmbedder::new(64)), RetryPolicy::default(), 8);

    let chunks = ragsync::chunk::chunk_units(
        &[ragsync::loader::LoadedUnit::text("Leaf collection runs through November")],
        ragsync::chunk::ChunkSettings::new(1000, 200).unwrap(),
        &ChunkMetadata::for_source("/d/leaves.txt"),
    );
    index.replace_source("/d/leaves.txt", &chunks).await.unwrap();
    index
        .replace_source(
            "/d/pool.txt",
            &ragsync::chunk::chunk_units(
                &[ragsync::loader::LoadedUnit::text("The pool opens in June")],
                ragsync::chunk::ChunkSettings::new(1000, 200).unwrap(),
                &ChunkMetadata::for_source("/d/pool.txt"),
            ),
        )
        .await
        .unwrap();

    let hits = index
        .similarity_search("leaf collection November", 1, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source, "/d/leaves.txt");
    assert_eq!(
        index.list_distinct_sources().await.unwrap(),
        vec!["/d/leaves.txt", "/d/pool.txt"]
    );
}
