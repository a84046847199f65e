//! Similarity search over the index.
//!
//! Used by `ragsync search`. Results are printed in a stable, numbered
//! layout so they can be read by people and grepped by scripts.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::index::VectorIndex;
use crate::models::SearchHit;
use crate::store::MetadataFilter;

/// Optional exact-match restrictions applied before ranking.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub source: Option<String>,
    pub category: Option<String>,
    pub topic: Option<String>,
}

impl SearchFilters {
    pub fn to_metadata_filter(&self) -> MetadataFilter {
        let mut filter = MetadataFilter::new();
        if let Some(source) = &self.source {
            filter = filter.eq("source", source);
        }
        if let Some(category) = &self.category {
            filter = filter.eq("category", category);
        }
        if let Some(topic) = &self.topic {
            filter = filter.eq("topic", topic);
        }
        filter
    }
}

/// Search the configured index and return the hits.
pub async fn search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    filters: &SearchFilters,
) -> Result<Vec<SearchHit>> {
    if !query.trim().is_empty() && !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let index = VectorIndex::open(config).await?;
    let k = limit.unwrap_or(config.retrieval.default_k);
    let filter = filters.to_metadata_filter();
    let filter = (!filter.is_empty()).then_some(&filter);

    Ok(index.similarity_search(query, k, filter).await?)
}

pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    filters: SearchFilters,
) -> Result<()> {
    let hits = search(config, query, limit, &filters).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        print_hit(i + 1, hit);
    }
    Ok(())
}

fn print_hit(rank: usize, hit: &SearchHit) {
    let label = hit
        .metadata
        .topic
        .as_deref()
        .unwrap_or_else(|| file_name(&hit.source));
    match hit.score {
        Some(score) => println!("{}. [{:.2}] {} / {}", rank, score, label, hit.chunk_index),
        None => println!("{}. {} / {}", rank, label, hit.chunk_index),
    }
    println!("    source: {}", hit.source);
    if let Some(category) = &hit.metadata.category {
        println!("    category: {}", category);
    }
    println!("    excerpt: \"{}\"", excerpt(&hit.content, 240));
    println!("    id: {}", hit.vector_id);
    println!();
}

fn file_name(source: &str) -> &str {
    source.rsplit(['/', '\\']).next().unwrap_or(source)
}

/// Single-line preview of at most `max_chars` characters.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
