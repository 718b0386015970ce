//! Traits for the hosted collaborators the pipeline depends on.
//!
//! The application crate provides the OpenAI and Qdrant implementations;
//! tests substitute in-process fakes.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{IndexPoint, ScoredPoint};
use crate::prompt::ChatPrompt;

/// Converts text into fixed-length vectors.
///
/// Implementations must fail on provider errors rather than return
/// placeholder vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts. The result has one vector per input, in
    /// input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))
    }
}

/// Similarity metric of a vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distance {
    #[default]
    Cosine,
    Dot,
    Euclid,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::Cosine => "Cosine",
            Distance::Dot => "Dot",
            Distance::Euclid => "Euclid",
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Distance {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Distance::Cosine),
            "dot" => Ok(Distance::Dot),
            "euclid" | "euclidean" => Ok(Distance::Euclid),
            other => bail!("Unknown distance metric: '{}'. Must be Cosine, Dot, or Euclid.", other),
        }
    }
}

/// Nearest-neighbor store of `(vector, payload)` points in named collections.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if it does not exist yet.
    async fn ensure_collection(&self, name: &str, vector_size: usize, distance: Distance)
        -> Result<()>;

    /// Return up to `top_k` points ordered by decreasing similarity.
    async fn search(&self, collection: &str, vector: &[f32], top_k: usize)
        -> Result<Vec<ScoredPoint>>;

    async fn upsert(&self, collection: &str, points: &[IndexPoint]) -> Result<()>;

    /// Drop a collection. Dropping a missing collection is not an error.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    /// Drop the collection if present and create it empty.
    async fn recreate_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> Result<()> {
        self.delete_collection(name).await?;
        self.ensure_collection(name, vector_size, distance).await
    }

    /// Cheap reachability probe.
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Chat-completion model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Run one system + user turn and return the assistant's text.
    async fn complete(&self, prompt: &ChatPrompt) -> Result<String>;
}
