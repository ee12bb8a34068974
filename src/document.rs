//! Document loading and semantic chunking.
//!
//! The worker hands this module a file path from a queued task; it reads the supported plain-text
//! formats and splits the content into token-bounded chunks with a sliding word overlap so that
//! spans near chunk boundaries stay visible to retrieval.

use semchunk_rs::Chunker;
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Chunk token budget used when no override is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Errors raised while loading a document from disk.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The file extension is not one of the supported plain-text formats.
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),
    /// The file could not be read.
    #[error("Failed to read document {path}: {source}")]
    Read {
        /// Path that failed to load.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Read a document's text content, accepting `.txt`, `.text`, and `.md` files.
pub async fn load_text(path: &str) -> Result<String, DocumentError> {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if !matches!(extension.as_str(), "txt" | "text" | "md") {
        return Err(DocumentError::UnsupportedFormat(path.to_string()));
    }

    fs::read_to_string(path)
        .await
        .map_err(|source| DocumentError::Read {
            path: path.to_string(),
            source,
        })
}

/// Split text into chunks of at most `chunk_size` whitespace tokens.
///
/// When `overlap` is non-zero, each chunk after the first is prefixed with the tail of its
/// predecessor, then trimmed from the front so the token budget still holds. Returns an empty
/// vector for all-whitespace input.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let chunk_size = chunk_size.max(1);

    let chunker = Chunker::new(chunk_size, Box::new(token_count));
    let chunks = chunker.chunk(text);
    apply_overlap(chunks, chunk_size, overlap)
}

fn token_count(segment: &str) -> usize {
    let tokens = segment.split_whitespace().count();
    if tokens == 0 && !segment.is_empty() {
        1
    } else {
        tokens
    }
}

fn apply_overlap(chunks: Vec<String>, chunk_size: usize, overlap: usize) -> Vec<String> {
    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if effective_overlap == 0 || chunks.len() < 2 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut previous: Option<String> = None;

    for current in chunks {
        let combined = match &previous {
            Some(prior) => {
                let tail = word_tail(prior, effective_overlap);
                let joined = if tail.is_empty() {
                    current.clone()
                } else {
                    format!("{tail} {current}")
                };
                trim_to_budget(&joined, chunk_size)
            }
            None => current.clone(),
        };
        overlapped.push(combined);
        previous = Some(current);
    }

    overlapped
}

/// The last `count` whitespace tokens of `text`, joined by single spaces.
fn word_tail(text: &str, count: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let start = words.len().saturating_sub(count);
    words[start..].join(" ")
}

/// Drop leading tokens until the text fits within `budget` tokens.
fn trim_to_budget(text: &str, budget: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let start = words.len().saturating_sub(budget);
    words[start..].join(" ")
}
