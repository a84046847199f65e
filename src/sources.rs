//! Source discovery: which files the index knows about, and what it holds
//! for each of them.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::index::VectorIndex;
use crate::models::SearchHit;
use crate::store::MetadataFilter;

/// Upper bound on chunks listed for one source by `ragsync get`.
const GET_CHUNK_LIMIT: usize = 10_000;

pub async fn run_sources(config: &Config) -> Result<()> {
    let index = VectorIndex::open(config).await?;
    let sources = index.list_sources().await?;

    if sources.is_empty() {
        println!("No indexed sources.");
        return Ok(());
    }

    println!("{:<8} {:<20} SOURCE", "VECTORS", "MODIFIED");
    for summary in &sources {
        let modified = summary
            .modified_ms
            .and_then(chrono::DateTime::from_timestamp_millis)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<8} {:<20} {}", summary.vectors, modified, summary.source);
    }
    println!();
    println!("{} sources", sources.len());
    Ok(())
}

/// Every chunk stored for `source`, in ordinal order.
pub async fn get_source(config: &Config, source: &str) -> Result<Vec<SearchHit>> {
    let index = VectorIndex::open(config).await?;
    let filter = MetadataFilter::source(source);
    Ok(index
        .similarity_search("", GET_CHUNK_LIMIT, Some(&filter))
        .await?)
}

pub async fn run_get(config: &Config, source: &str) -> Result<()> {
    let chunks = get_source(config, source).await?;
    if chunks.is_empty() {
        bail!("source not indexed: {}", source);
    }

    let first = &chunks[0].metadata;
    println!("--- Source ---");
    println!("source:   {}", source);
    if let Some(category) = &first.category {
        println!("category: {}", category);
    }
    if let Some(topic) = &first.topic {
        println!("topic:    {}", topic);
    }
    println!();

    println!("--- Chunks ({}) ---", chunks.len());
    for chunk in &chunks {
        match chunk.metadata.extra.get("sheet") {
            Some(sheet) => println!("[chunk {}] sheet: {}", chunk.chunk_index, sheet),
            None => println!("[chunk {}]", chunk.chunk_index),
        }
        println!("{}", chunk.content);
        println!();
    }
    Ok(())
}
