//! # NerdsIQ Core
//!
//! Runtime-free building blocks of the NerdsIQ question-answering service:
//! data models, the query cache, per-session conversation memory, the
//! token-window chunker, prompt and context assembly, and the traits the
//! application implements for its hosted collaborators (embeddings, vector
//! search, chat completion, tokenization).
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Concrete OpenAI, Qdrant, and Google Drive clients live in the `nerdsiq`
//! application crate.

pub mod cache;
pub mod chunk;
pub mod clock;
pub mod error;
pub mod memory;
pub mod models;
pub mod prompt;
pub mod provider;
pub mod vector;

pub use error::{RagError, Stage};
pub use models::{CachedAnswer, DocumentChunk, Exchange, IndexPoint, RetrievedChunk, ScoredPoint};
