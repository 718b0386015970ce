//! Token-window text chunker for the ingestion path.
//!
//! Splits document text into overlapping windows of `chunk_size` tokens so
//! each chunk fits comfortably in the embedding model's input and adjacent
//! chunks share `overlap` tokens of context.
//!
//! # Algorithm
//!
//! 1. Encode the text with a model-consistent [`Tokenizer`].
//! 2. Emit the window `[start, min(start + chunk_size, len))`.
//! 3. Advance `start` by `chunk_size - overlap`.
//! 4. Stop once `start` reaches or passes the token count.
//! 5. Decode each window back to text.
//!
//! With `chunk_size = 500` and `overlap = 50`, a 1200-token document yields
//! the windows `[0, 500)`, `[450, 950)` and `[900, 1200)`.
//!
//! # Example
//!
//! ```rust
//! use nerdsiq_core::chunk::window_ranges;
//!
//! let windows = window_ranges(1200, 500, 50).unwrap();
//! assert_eq!(windows, vec![0..500, 450..950, 900..1200]);
//! ```

use std::ops::Range;

use anyhow::Result;

use crate::error::RagError;
use crate::models::DocumentChunk;

/// Default window size in tokens.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default overlap between consecutive windows, in tokens.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Converts between text and model token ids.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;
    fn decode(&self, tokens: &[u32]) -> Result<String>;
}

/// Reject window parameters that cannot make progress.
pub fn validate_window(chunk_size: usize, overlap: usize) -> Result<(), RagError> {
    if chunk_size == 0 {
        return Err(RagError::Configuration(
            "chunk_size must be > 0".to_string(),
        ));
    }
    if overlap >= chunk_size {
        return Err(RagError::Configuration(format!(
            "chunk overlap ({}) must be smaller than chunk_size ({})",
            overlap, chunk_size
        )));
    }
    Ok(())
}

/// Token index ranges covered by each chunk.
///
/// Empty input yields no windows; input no longer than one step
/// (`chunk_size - overlap`) yields a single window spanning all of it.
pub fn window_ranges(
    token_count: usize,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Range<usize>>, RagError> {
    validate_window(chunk_size, overlap)?;

    let step = chunk_size - overlap;
    let mut windows = Vec::new();
    let mut start = 0;

    while start < token_count {
        let end = (start + chunk_size).min(token_count);
        windows.push(start..end);
        start += step;
    }

    Ok(windows)
}

/// Split text into overlapping token windows, decoded back to text.
pub fn chunk_text(
    tokenizer: &dyn Tokenizer,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<String>> {
    let tokens = tokenizer.encode(text);
    window_ranges(tokens.len(), chunk_size, overlap)?
        .into_iter()
        .map(|window| tokenizer.decode(&tokens[window]))
        .collect()
}

/// Provenance carried from a source document into each of its chunks.
#[derive(Debug, Clone)]
pub struct SourceRef<'a> {
    pub source_id: &'a str,
    pub source_name: &'a str,
    pub source_url: &'a str,
}

/// Chunk a document and attach provenance and contiguous indices.
pub fn chunk_document(
    tokenizer: &dyn Tokenizer,
    text: &str,
    chunk_size: usize,
    overlap: usize,
    source: &SourceRef<'_>,
) -> Result<Vec<DocumentChunk>> {
    let chunks = chunk_text(tokenizer, text, chunk_size, overlap)?;
    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(chunk_index, text)| DocumentChunk {
            text,
            chunk_index,
            source_id: source.source_id.to_string(),
            source_name: source.source_name.to_string(),
            source_url: source.source_url.to_string(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One token per character.
    struct CharTokenizer;

    impl Tokenizer for CharTokenizer {
        fn encode(&self, text: &str) -> Vec<u32> {
            text.chars().map(|c| c as u32).collect()
        }

        fn decode(&self, tokens: &[u32]) -> Result<String> {
            tokens
                .iter()
                .map(|&t| char::from_u32(t).ok_or_else(|| anyhow::anyhow!("bad token {}", t)))
                .collect()
        }
    }

    #[test]
    fn test_windows_for_1200_tokens() {
        let windows = window_ranges(1200, 500, 50).unwrap();
        assert_eq!(windows, vec![0..500, 450..950, 900..1200]);

        // Consecutive windows overlap by exactly `overlap` and leave no gaps.
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end - pair[1].start, 50);
        }
        assert_eq!(windows.first().unwrap().start, 0);
        assert_eq!(windows.last().unwrap().end, 1200);
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text(&CharTokenizer, "Hello, world!", 500, 50).unwrap();
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_window_ending_on_last_token_still_steps() {
        // The next start (450) is still inside the text, so it opens a window.
        assert_eq!(window_ranges(500, 500, 50).unwrap(), vec![0..500, 450..500]);
        assert_eq!(
            window_ranges(950, 500, 50).unwrap(),
            vec![0..500, 450..950, 900..950]
        );
        assert_eq!(window_ranges(300, 500, 50).unwrap(), vec![0..300]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunk_text(&CharTokenizer, "", 500, 50).unwrap().is_empty());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_window() {
        assert!(matches!(
            window_ranges(10, 5, 5),
            Err(RagError::Configuration(_))
        ));
        assert!(matches!(
            window_ranges(10, 5, 9),
            Err(RagError::Configuration(_))
        ));
        assert!(matches!(
            window_ranges(10, 0, 0),
            Err(RagError::Configuration(_))
        ));
        assert!(chunk_text(&CharTokenizer, "abc", 2, 2).is_err());
    }

    #[test]
    fn test_chunks_overlap_text() {
        let chunks = chunk_text(&CharTokenizer, "abcdefghij", 4, 1).unwrap();
        assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn test_chunk_document_provenance() {
        let source = SourceRef {
            source_id: "file-1",
            source_name: "Returns.docx",
            source_url: "https://x/doc1",
        };
        let chunks = chunk_document(&CharTokenizer, "abcdefghij", 4, 1, &source).unwrap();
        assert_eq!(chunks.len(), 3);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.source_id, "file-1");
            assert_eq!(c.source_url, "https://x/doc1");
        }
    }
}
