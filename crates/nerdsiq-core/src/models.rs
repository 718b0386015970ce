//! Core data models shared by the query and ingestion paths.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One question/answer pair held in a session's conversation memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}

impl Exchange {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// The value stored in the query cache: a finished answer and its
/// ordered, de-duplicated source URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub answer: String,
    pub sources: Vec<String>,
}

/// A point returned by a vector index search.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub payload: Value,
    pub score: f32,
}

/// A chunk retrieved for a live query, decoded from a [`ScoredPoint`]
/// payload. Transient: consumed immediately to build the prompt context.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub text: String,
    pub source_name: String,
    pub source_url: String,
    /// Zero-based position in the search result list (0 = most relevant).
    pub rank: usize,
    pub score: f32,
}

impl RetrievedChunk {
    /// Decode a search hit. Missing payload fields fall back to empty
    /// text, `"Unknown"` source name, and an empty URL.
    pub fn from_point(point: &ScoredPoint, rank: usize) -> Self {
        let field = |name: &str| point.payload.get(name).and_then(Value::as_str);
        Self {
            text: field("text").unwrap_or_default().to_string(),
            source_name: field("source_name").unwrap_or("Unknown").to_string(),
            source_url: field("source_url").unwrap_or_default().to_string(),
            rank,
            score: point.score,
        }
    }
}

/// A token-bounded slice of a source document, produced by ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChunk {
    pub text: String,
    pub chunk_index: usize,
    pub source_id: String,
    pub source_name: String,
    pub source_url: String,
}

impl DocumentChunk {
    /// The payload stored alongside the chunk's vector in the index.
    pub fn payload(&self) -> Value {
        json!({
            "text": self.text,
            "source_id": self.source_id,
            "source_name": self.source_name,
            "source_url": self.source_url,
            "chunk_index": self.chunk_index,
        })
    }
}

/// A point written to the vector index.
#[derive(Debug, Clone)]
pub struct IndexPoint {
    pub id: u64,
    pub vector: Vec<f32>,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retrieved_chunk_defaults() {
        let point = ScoredPoint {
            payload: json!({ "text": "hello" }),
            score: 0.5,
        };
        let chunk = RetrievedChunk::from_point(&point, 2);
        assert_eq!(chunk.text, "hello");
        assert_eq!(chunk.source_name, "Unknown");
        assert_eq!(chunk.source_url, "");
        assert_eq!(chunk.rank, 2);
    }

    #[test]
    fn test_document_chunk_payload_fields() {
        let chunk = DocumentChunk {
            text: "body".into(),
            chunk_index: 3,
            source_id: "file-1".into(),
            source_name: "Handbook".into(),
            source_url: "https://x/doc1".into(),
        };
        let payload = chunk.payload();
        assert_eq!(payload["chunk_index"], 3);
        assert_eq!(payload["source_name"], "Handbook");
        assert_eq!(payload["source_url"], "https://x/doc1");
    }
}
