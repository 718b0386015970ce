//! Query orchestration: cache → embed → search → prompt → model → memory → cache.
//!
//! [`RagService`] owns the process-wide query cache and session memory and
//! talks to the embedding provider, vector index, and language model through
//! the core traits, so tests can run the whole pipeline against fakes.
//!
//! Every external call runs under its own deadline and observes the
//! caller's [`CancellationToken`]. A failed, timed-out, or cancelled query
//! leaves the cache and session memory exactly as they were.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nerdsiq_core::cache::{cache_key, CacheStats, InMemoryQueryCache, QueryCache};
use nerdsiq_core::memory::{format_history, InMemorySessionStore, SessionStore};
use nerdsiq_core::models::{CachedAnswer, RetrievedChunk};
use nerdsiq_core::prompt::{assemble_context, build_prompt};
use nerdsiq_core::provider::{EmbeddingProvider, LanguageModel, VectorIndex};
use nerdsiq_core::{RagError, Stage};

use crate::config::Config;
use crate::embedding::OpenAIEmbeddings;
use crate::llm::OpenAIChat;
use crate::logging::preview;
use crate::qdrant::QdrantClient;

/// Per-query knobs.
#[derive(Debug, Clone)]
pub struct RagSettings {
    pub collection: String,
    pub top_k: usize,
    pub embed_timeout: Duration,
    pub search_timeout: Duration,
    pub model_timeout: Duration,
}

impl RagSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            collection: config.qdrant.collection.clone(),
            top_k: config.rag.top_k,
            embed_timeout: config.rag.embed_timeout(),
            search_timeout: config.rag.search_timeout(),
            model_timeout: config.rag.model_timeout(),
        }
    }
}

/// The result of one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswer {
    pub answer: String,
    /// Distinct source URLs in first-seen order.
    pub sources: Vec<String>,
    /// Whether the answer came from the query cache.
    pub cached: bool,
}

pub struct RagService {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn LanguageModel>,
    cache: Arc<dyn QueryCache>,
    memory: Arc<dyn SessionStore>,
    settings: RagSettings,
}

impl RagService {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn LanguageModel>,
        cache: Arc<dyn QueryCache>,
        memory: Arc<dyn SessionStore>,
        settings: RagSettings,
    ) -> Self {
        Self {
            embedder,
            index,
            model,
            cache,
            memory,
            settings,
        }
    }

    /// Wire the OpenAI and Qdrant clients with in-process cache and memory.
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config.openai_api_key()?;
        let embedder = OpenAIEmbeddings::new(&config.openai, api_key.clone())?;
        let model = OpenAIChat::new(&config.openai, api_key)?;
        let index = QdrantClient::new(&config.qdrant)?;
        let cache = InMemoryQueryCache::new(config.cache.ttl_secs, config.cache.max_entries);
        let memory = InMemorySessionStore::new(config.rag.memory_window, config.rag.max_sessions);

        Ok(Self::new(
            Arc::new(embedder),
            Arc::new(index),
            Arc::new(model),
            Arc::new(cache),
            Arc::new(memory),
            RagSettings::from_config(config),
        ))
    }

    /// Answer a question within a conversation session.
    pub async fn query(&self, question: &str, session_id: &str) -> Result<QueryAnswer, RagError> {
        self.query_with_cancel(question, session_id, &CancellationToken::new())
            .await
    }

    /// Like [`RagService::query`], aborting at the next external call once
    /// `cancel` fires.
    pub async fn query_with_cancel(
        &self,
        question: &str,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryAnswer, RagError> {
        if question.trim().is_empty() {
            return Err(RagError::EmptyQuestion);
        }
        info!(question = %preview(question, 50), session_id, "processing query");

        let key = cache_key(question);
        if let Some(hit) = self.cache.get(&key).await {
            debug!(key = %key, "cache hit");
            return Ok(QueryAnswer {
                answer: hit.answer,
                sources: hit.sources,
                cached: true,
            });
        }

        let settings = &self.settings;

        let vector = run_stage(
            Stage::Embed,
            settings.embed_timeout,
            cancel,
            self.embedder.embed(question),
        )
        .await?;

        let hits = run_stage(
            Stage::Search,
            settings.search_timeout,
            cancel,
            self.index
                .search(&settings.collection, &vector, settings.top_k),
        )
        .await?;

        let retrieved: Vec<RetrievedChunk> = hits
            .iter()
            .enumerate()
            .map(|(rank, point)| RetrievedChunk::from_point(point, rank))
            .collect();
        let assembled = assemble_context(&retrieved);

        let exchanges = self.memory.get_or_create(session_id).await;
        let history = format_history(&exchanges);
        let prompt = build_prompt(&assembled.context, &history, question);

        let answer = run_stage(
            Stage::Model,
            settings.model_timeout,
            cancel,
            self.model.complete(&prompt),
        )
        .await?;

        self.memory.append(session_id, question, &answer).await;
        self.cache
            .put(
                &key,
                CachedAnswer {
                    answer: answer.clone(),
                    sources: assembled.sources.clone(),
                },
            )
            .await;

        info!(
            session_id,
            chunks = retrieved.len(),
            sources = assembled.sources.len(),
            "query answered"
        );

        Ok(QueryAnswer {
            answer,
            sources: assembled.sources,
            cached: false,
        })
    }

    pub async fn clear_session(&self, session_id: &str) {
        self.memory.clear(session_id).await;
    }

    /// Drop every cached answer, e.g. after the document set changed.
    pub async fn invalidate_cache(&self) {
        let before = self.cache.stats().entries;
        self.cache.invalidate_all().await;
        info!(entries = before, "query cache cleared");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn session_count(&self) -> usize {
        self.memory.session_count()
    }

    /// Whether the vector index answers a health probe.
    pub async fn index_healthy(&self) -> bool {
        match self.index.health().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "vector index health check failed");
                false
            }
        }
    }
}

/// Run one external call under a deadline, racing the cancellation token.
async fn run_stage<T, F>(
    stage: Stage,
    deadline: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T, RagError>
where
    F: Future<Output = Result<T>>,
{
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(RagError::Cancelled { stage }),
        outcome = tokio::time::timeout(deadline, call) => outcome,
    };

    match outcome {
        Err(_) => {
            warn!(%stage, timeout_secs = deadline.as_secs_f64(), "stage timed out");
            Err(RagError::Timeout { stage })
        }
        Ok(Err(e)) => {
            warn!(%stage, error = %e, "stage failed");
            Err(RagError::provider(stage, format!("{:#}", e)))
        }
        Ok(Ok(value)) => Ok(value),
    }
}
