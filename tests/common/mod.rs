//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;

use nerdsiq::drive::{decode_text, DocumentSource, DriveFile};
use nerdsiq::rag::{RagService, RagSettings};
use nerdsiq_core::cache::InMemoryQueryCache;
use nerdsiq_core::chunk::Tokenizer;
use nerdsiq_core::memory::InMemorySessionStore;
use nerdsiq_core::models::ScoredPoint;
use nerdsiq_core::prompt::ChatPrompt;
use nerdsiq_core::provider::{EmbeddingProvider, LanguageModel};
use nerdsiq_core::vector::InMemoryVectorIndex;

pub const DIMS: usize = 4;

/// Returns the same unit vector for every text and counts calls.
#[derive(Default)]
pub struct FakeEmbedder {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl FakeEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake-embed"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("embedding service unavailable");
        }
        Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
    }
}

pub enum ModelBehavior {
    Answer(String),
    Fail,
    Hang,
}

/// Records every prompt it receives.
pub struct FakeModel {
    pub behavior: ModelBehavior,
    pub calls: AtomicUsize,
    pub prompts: std::sync::Mutex<Vec<ChatPrompt>>,
}

impl FakeModel {
    pub fn answering(answer: &str) -> Self {
        Self::with(ModelBehavior::Answer(answer.to_string()))
    }

    pub fn with(behavior: ModelBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<ChatPrompt> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    fn model_name(&self) -> &str {
        "fake-chat"
    }

    async fn complete(&self, prompt: &ChatPrompt) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        match &self.behavior {
            ModelBehavior::Answer(a) => Ok(a.clone()),
            ModelBehavior::Fail => bail!("model returned 500"),
            ModelBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("too late".to_string())
            }
        }
    }
}

/// Whitespace tokenizer: one token per word, ids index into a word list.
#[derive(Default)]
pub struct WordTokenizer {
    words: std::sync::Mutex<Vec<String>>,
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        let mut words = self.words.lock().unwrap();
        text.split_whitespace()
            .map(|w| {
                let pos = match words.iter().position(|known| known == w) {
                    Some(pos) => pos,
                    None => {
                        words.push(w.to_string());
                        words.len() - 1
                    }
                };
                pos as u32
            })
            .collect()
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        let words = self.words.lock().unwrap();
        Ok(tokens
            .iter()
            .map(|t| words[*t as usize].as_str())
            .collect::<Vec<_>>()
            .join(" "))
    }
}

/// A folder of in-memory files. Content `None` makes the download fail;
/// bytes go through the same UTF-8 check as real Drive downloads.
pub struct FakeSource {
    pub files: Vec<(DriveFile, Option<Vec<u8>>)>,
}

pub fn drive_file(id: &str, name: &str, mime_type: &str) -> DriveFile {
    DriveFile {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: mime_type.to_string(),
        web_view_link: Some(format!("https://x/{}", id)),
        modified_time: None,
    }
}

#[async_trait]
impl DocumentSource for FakeSource {
    async fn list_files(&self, _folder_id: &str) -> Result<Vec<DriveFile>> {
        Ok(self.files.iter().map(|(f, _)| f.clone()).collect())
    }

    async fn file_content(&self, file: &DriveFile) -> Result<String> {
        match self.files.iter().find(|(f, _)| f.id == file.id) {
            Some((_, Some(bytes))) => decode_text(bytes),
            _ => bail!("download failed for {}", file.id),
        }
    }
}

pub fn point(text: &str, name: &str, url: &str, score: f32) -> ScoredPoint {
    ScoredPoint {
        payload: json!({ "text": text, "source_name": name, "source_url": url }),
        score,
    }
}

pub fn settings(model_timeout: Duration) -> RagSettings {
    RagSettings {
        collection: "nerdsiq_docs".to_string(),
        top_k: 5,
        embed_timeout: Duration::from_secs(5),
        search_timeout: Duration::from_secs(5),
        model_timeout,
    }
}

/// Collaborators of a [`RagService`], kept so tests can inspect them.
pub struct Harness {
    pub embedder: Arc<FakeEmbedder>,
    pub index: Arc<InMemoryVectorIndex>,
    pub model: Arc<FakeModel>,
    pub cache: Arc<InMemoryQueryCache>,
    pub memory: Arc<InMemorySessionStore>,
}

impl Harness {
    pub fn new(model: FakeModel) -> Self {
        Self {
            embedder: Arc::new(FakeEmbedder::default()),
            index: Arc::new(InMemoryVectorIndex::new()),
            model: Arc::new(model),
            cache: Arc::new(InMemoryQueryCache::new(3600, 100)),
            memory: Arc::new(InMemorySessionStore::new(5, 100)),
        }
    }

    pub fn service(&self, settings: RagSettings) -> RagService {
        RagService::new(
            self.embedder.clone(),
            self.index.clone(),
            self.model.clone(),
            self.cache.clone(),
            self.memory.clone(),
            settings,
        )
    }
}
