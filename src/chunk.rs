//! Recursive character text chunker.
//!
//! Splits extracted document text into overlapping windows of at most
//! `chunk_size` characters. Splitting prefers paragraph breaks, then line
//! breaks, then spaces, and only cuts inside a word when nothing else fits.
//! Consecutive windows share up to `chunk_overlap` characters of context.
//!
//! Each chunk receives a deterministic UUID derived from its source path,
//! ordinal and content hash, so re-ingesting unchanged text reproduces the
//! exact same vector IDs.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::NamingRule;
use crate::loader::LoadedUnit;
use crate::models::{Chunk, ChunkMetadata};

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Validated window parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkSettings {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> anyhow::Result<Self> {
        if chunk_size == 0 {
            anyhow::bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            anyhow::bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }
}

/// Split `text` into ordered windows. Whitespace-only windows are dropped.
///
/// Callers must uphold `chunk_overlap < chunk_size`; [`ChunkSettings::new`]
/// checks it once at startup.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    debug_assert!(chunk_overlap < chunk_size);
    if text.trim().is_empty() {
        return Vec::new();
    }
    split_recursive(text, &SEPARATORS, chunk_size, chunk_overlap)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_recursive(
    text: &str,
    separators: &[&str],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    // Pick the coarsest separator that actually occurs in this text
    let mut separator = separators[separators.len() - 1];
    let mut finer: &[&str] = &[];
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() {
            separator = sep;
            break;
        }
        if text.contains(sep) {
            separator = sep;
            finer = &separators[i + 1..];
            break;
        }
    }

    let pieces: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|p| !p.is_empty()).collect()
    };

    let mut out = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();
    for piece in pieces {
        if char_len(piece) < chunk_size {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            out.extend(merge_pieces(&fitting, separator, chunk_size, chunk_overlap));
            fitting.clear();
        }
        if finer.is_empty() {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        } else {
            out.extend(split_recursive(piece, finer, chunk_size, chunk_overlap));
        }
    }
    if !fitting.is_empty() {
        out.extend(merge_pieces(&fitting, separator, chunk_size, chunk_overlap));
    }
    out
}

/// Greedily pack pieces into windows, keeping a tail of at most
/// `chunk_overlap` characters as the head of the next window.
fn merge_pieces(
    pieces: &[&str],
    separator: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut windows = Vec::new();
    let mut current: std::collections::VecDeque<(&str, usize)> = Default::default();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);
        let joined_len = |total: usize, n: usize| total + len + if n > 0 { sep_len } else { 0 };

        if joined_len(total, current.len()) > chunk_size && !current.is_empty() {
            push_window(&mut windows, &current, separator);
            while total > chunk_overlap
                || (joined_len(total, current.len()) > chunk_size && total > 0)
            {
                let Some((_, first_len)) = current.pop_front() else {
                    break;
                };
                total -= first_len + if current.is_empty() { 0 } else { sep_len };
            }
        }

        total += len + if current.is_empty() { 0 } else { sep_len };
        current.push_back((piece, len));
    }
    push_window(&mut windows, &current, separator);
    windows
}

fn push_window(
    windows: &mut Vec<String>,
    current: &std::collections::VecDeque<(&str, usize)>,
    separator: &str,
) {
    let joined = current
        .iter()
        .map(|(p, _)| *p)
        .collect::<Vec<_>>()
        .join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        windows.push(trimmed.to_string());
    }
}

/// Derive `(category, topic)` from a filename using the first matching rule.
pub fn derive_naming(file_name: &str, rules: &[NamingRule]) -> (Option<String>, Option<String>) {
    for rule in rules {
        if let Some(rest) = file_name.strip_prefix(&rule.prefix) {
            let topic = match rest.rfind('.') {
                Some(dot) if dot > 0 => &rest[..dot],
                _ => rest,
            };
            let topic = (!topic.is_empty()).then(|| topic.to_string());
            return (Some(rule.category.clone()), topic);
        }
    }
    (None, None)
}

/// Split every loaded unit and number the resulting chunks contiguously.
///
/// `base` carries the file-level provenance (source, category, topic, mtime);
/// unit metadata such as a sheet name is layered on top of it.
pub fn chunk_units(units: &[LoadedUnit], settings: ChunkSettings, base: &ChunkMetadata) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;
    for unit in units {
        for window in split_text(&unit.text, settings.chunk_size, settings.chunk_overlap) {
            let mut metadata = base.clone();
            for (k, v) in &unit.metadata {
                metadata.extra.insert(k.clone(), v.clone());
            }
            chunks.push(make_chunk(chunk_index, window, metadata));
            chunk_index += 1;
        }
    }
    chunks
}

fn make_chunk(index: i64, text: String, metadata: ChunkMetadata) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let name = format!("{}\u{0}{}\u{0}{}", metadata.source, index, hash);
    let id = Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes()).to_string();

    Chunk {
        id,
        chunk_index: index,
        text,
        hash,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn unit(text: &str) -> LoadedUnit {
        LoadedUnit {
            text: text.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = split_text("Hello, world!", 1000, 200);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn empty_and_blank_text_yield_nothing() {
        assert!(split_text("", 1000, 200).is_empty());
        assert!(split_text("   \n\n\t ", 1000, 200).is_empty());
    }

    #[test]
    fn windows_respect_size() {
        let text = (0..200)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_text(&text, 50, 10);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(char_len(c) <= 50, "window too long: {} chars", char_len(c));
        }
    }

    #[test]
    fn consecutive_windows_overlap() {
        let text = (0..100)
            .map(|i| format!("w{:03}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_text(&text, 40, 12);
        for pair in chunks.windows(2) {
            let last_word = pair[0].split(' ').next_back().unwrap();
            assert!(
                pair[1].starts_with(last_word) || pair[1].contains(last_word),
                "expected '{}' carried into '{}'",
                last_word,
                pair[1]
            );
        }
    }

    #[test]
    fn zero_overlap_has_no_shared_words() {
        let text = "aaa bbb ccc ddd eee fff ggg hhh";
        let chunks = split_text(text, 8, 0);
        assert_eq!(chunks, vec!["aaa bbb", "ccc ddd", "eee fff", "ggg hhh"]);
    }

    #[test]
    fn paragraphs_preferred_over_words() {
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let chunks = split_text(text, 30, 0);
        assert_eq!(
            chunks,
            vec!["First paragraph here.", "Second paragraph here."]
        );
    }

    #[test]
    fn unbroken_text_is_cut_by_characters() {
        let text = "x".repeat(25);
        let chunks = split_text(&text, 10, 2);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| char_len(c) <= 10));
    }

    #[test]
    fn multibyte_text_is_measured_in_chars() {
        let text = "é".repeat(30);
        let chunks = split_text(&text, 10, 0);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| char_len(c) == 10));
    }

    #[test]
    fn deterministic() {
        let text = (0..500)
            .map(|i| format!("Sentence number {} talks about zoning.", i))
            .collect::<Vec<_>>()
            .join("\n");
        let a = split_text(&text, 1000, 200);
        let b = split_text(&text, 1000, 200);
        assert_eq!(a, b);
    }

    #[test]
    fn settings_reject_overlap_not_below_size() {
        assert!(ChunkSettings::new(100, 100).is_err());
        assert!(ChunkSettings::new(0, 0).is_err());
        assert!(ChunkSettings::new(100, 99).is_ok());
    }

    #[test]
    fn naming_rule_derives_category_and_topic() {
        let rules = vec![NamingRule {
            prefix: "bedford_".to_string(),
            category: "bedford_information".to_string(),
        }];
        let (category, topic) = derive_naming("bedford_trash_recycling.txt", &rules);
        assert_eq!(category.as_deref(), Some("bedford_information"));
        assert_eq!(topic.as_deref(), Some("trash_recycling"));

        assert_eq!(derive_naming("report.pdf", &rules), (None, None));
    }

    #[test]
    fn chunk_indices_contiguous_across_units() {
        let settings = ChunkSettings::new(20, 0).unwrap();
        let base = ChunkMetadata::for_source("/docs/book.xlsx");
        let mut sheet = unit("alpha beta gamma delta epsilon zeta eta theta");
        sheet.metadata.insert("sheet".into(), "Orders".into());
        let units = vec![sheet, unit("iota kappa lambda mu nu xi omicron")];

        let chunks = chunk_units(&units, settings, &base);
        assert!(chunks.len() > 2);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.metadata.source, "/docs/book.xlsx");
        }
        assert_eq!(chunks[0].metadata.extra.get("sheet").map(String::as_str), Some("Orders"));
        assert!(chunks.last().unwrap().metadata.extra.get("sheet").is_none());
    }

    #[test]
    fn chunk_ids_stable_and_source_scoped() {
        let settings = ChunkSettings::new(1000, 200).unwrap();
        let units = vec![unit("Same words in two files.")];
        let a1 = chunk_units(&units, settings, &ChunkMetadata::for_source("/a.txt"));
        let a2 = chunk_units(&units, settings, &ChunkMetadata::for_source("/a.txt"));
        let b = chunk_units(&units, settings, &ChunkMetadata::for_source("/b.txt"));
        assert_eq!(a1[0].id, a2[0].id);
        assert_eq!(a1[0].hash, b[0].hash);
        assert_ne!(a1[0].id, b[0].id);
    }
}
