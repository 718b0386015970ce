//! # NerdsIQ
//!
//! Retrieval-augmented question answering over a Google Drive folder.
//!
//! Documents are pulled from Drive, split into overlapping token windows,
//! embedded with OpenAI, and stored in Qdrant. Questions arrive over an
//! authenticated HTTP API and run through the query pipeline in [`rag`]:
//! cache lookup, embedding, vector search, prompt assembly with the
//! session's recent conversation, and a chat-completion call.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────┐
//! │ Google Drive │──▶│   Indexer   │──▶│  Qdrant  │
//! │   folder     │   │ Chunk+Embed │   │          │
//! └──────────────┘   └─────────────┘   └────┬─────┘
//!                                           │ search
//!                    ┌─────────────┐   ┌────┴─────┐   ┌──────────┐
//!        client ────▶│  HTTP API   │──▶│   RAG    │──▶│  OpenAI  │
//!                    │ auth+history│   │ cache+mem│   │   chat   │
//!                    └──────┬──────┘   └──────────┘   └──────────┘
//!                           ▼
//!                       SQLite
//! ```
//!
//! The runtime-free pieces (cache, session memory, chunker, prompt
//! assembly, collaborator traits) live in the `nerdsiq-core` crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`users`] | User accounts and password hashing |
//! | [`history`] | Chat history persistence |
//! | [`auth`] | JWT issuing and validation |
//! | [`embedding`] | OpenAI embeddings client |
//! | [`llm`] | OpenAI chat client |
//! | [`qdrant`] | Qdrant REST client |
//! | [`tokenizer`] | tiktoken tokenizer |
//! | [`drive`] | Google Drive document source |
//! | [`ingest`] | Indexing pipeline |
//! | [`rag`] | Query orchestration |
//! | [`server`] | HTTP API |

pub mod auth;
pub mod config;
pub mod db;
pub mod drive;
pub mod embedding;
pub mod history;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod qdrant;
pub mod rag;
pub mod server;
pub mod tokenizer;
pub mod users;
