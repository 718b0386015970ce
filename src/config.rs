//! Configuration parsing and validation.
//!
//! NerdsIQ is configured by a TOML file (default `./config/nerdsiq.toml`).
//! Every section except `[db]` is optional and falls back to the defaults
//! below. Secrets never live in the file: the OpenAI key comes from
//! `OPENAI_API_KEY` and the token signing secret from `JWT_SECRET`.
//!
//! ```toml
//! [db]
//! path = "./data/nerdsiq.sqlite"
//!
//! [openai]
//! chat_model = "gpt-4o-mini"
//! embedding_model = "text-embedding-3-small"
//! dims = 1536
//!
//! [qdrant]
//! url = "http://localhost:6333"
//! collection = "nerdsiq_docs"
//!
//! [rag]
//! top_k = 5
//! memory_window = 5
//!
//! [cache]
//! ttl_secs = 3600
//!
//! [chunking]
//! chunk_size = 500
//! overlap = 50
//!
//! [drive]
//! folder_id = "1AbC..."
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nerdsiq_core::chunk::validate_window;
use nerdsiq_core::provider::Distance;

/// Environment variable holding the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Longest accepted `[cache] ttl_secs`: one year.
pub const MAX_CACHE_TTL_SECS: u64 = 365 * 24 * 3600;

/// Longest accepted `[auth] token_ttl_minutes`: thirty days.
pub const MAX_TOKEN_TTL_MINUTES: i64 = 30 * 24 * 60;

/// Environment variable holding the HS256 token signing secret.
pub const JWT_SECRET_ENV: &str = "JWT_SECRET";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_env")]
    pub env: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { env: default_env() }
    }
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.env == "development"
    }
}

fn default_env() -> String {
    "development".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_openai_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            dims: default_dims(),
            temperature: default_temperature(),
            base_url: default_openai_base_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_openai_timeout_secs(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_temperature() -> f32 {
    0.7
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_openai_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct QdrantConfig {
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_distance")]
    pub distance: String,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            collection: default_collection(),
            api_key: None,
            distance: default_distance(),
        }
    }
}

impl QdrantConfig {
    pub fn distance(&self) -> Result<Distance> {
        self.distance.parse()
    }
}

fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "nerdsiq_docs".to_string()
}
fn default_distance() -> String {
    "Cosine".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RagConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_memory_window")]
    pub memory_window: usize,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_embed_timeout_secs")]
    pub embed_timeout_secs: u64,
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,
    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            memory_window: default_memory_window(),
            max_sessions: default_max_sessions(),
            embed_timeout_secs: default_embed_timeout_secs(),
            search_timeout_secs: default_search_timeout_secs(),
            model_timeout_secs: default_model_timeout_secs(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_memory_window() -> usize {
    5
}
fn default_max_sessions() -> usize {
    10_000
}
fn default_embed_timeout_secs() -> u64 {
    30
}
fn default_search_timeout_secs() -> u64 {
    10
}
fn default_model_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}
fn default_max_entries() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_tokenizer_model")]
    pub tokenizer_model: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            tokenizer_model: default_tokenizer_model(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}
fn default_tokenizer_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DriveConfig {
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default = "default_service_account_file")]
    pub service_account_file: PathBuf,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            folder_id: None,
            service_account_file: default_service_account_file(),
        }
    }
}

fn default_service_account_file() -> PathBuf {
    PathBuf::from("./credentials/google-service-account.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_minutes: default_token_ttl_minutes(),
        }
    }
}

fn default_token_ttl_minutes() -> i64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl RagConfig {
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }
}

impl Config {
    /// Read the OpenAI API key from the environment.
    pub fn openai_api_key(&self) -> Result<String> {
        std::env::var(OPENAI_API_KEY_ENV)
            .with_context(|| format!("{} environment variable not set", OPENAI_API_KEY_ENV))
    }

    /// Read the token signing secret from the environment.
    pub fn jwt_secret(&self) -> Result<String> {
        let secret = std::env::var(JWT_SECRET_ENV)
            .with_context(|| format!("{} environment variable not set", JWT_SECRET_ENV))?;
        if secret.trim().is_empty() {
            bail!("{} must not be empty", JWT_SECRET_ENV);
        }
        Ok(secret)
    }

    /// Check the invariants that would otherwise surface mid-query.
    pub fn validate(&self) -> Result<()> {
        validate_window(self.chunking.chunk_size, self.chunking.overlap)
            .map_err(|e| anyhow::anyhow!("chunking: {}", e))?;

        if self.rag.top_k < 1 {
            bail!("rag.top_k must be >= 1");
        }
        if self.rag.memory_window < 1 {
            bail!("rag.memory_window must be >= 1");
        }
        if self.rag.max_sessions < 1 {
            bail!("rag.max_sessions must be >= 1");
        }
        if !(1..=MAX_CACHE_TTL_SECS).contains(&self.cache.ttl_secs) {
            bail!("cache.ttl_secs must be in [1, {}]", MAX_CACHE_TTL_SECS);
        }
        if self.cache.max_entries < 1 {
            bail!("cache.max_entries must be >= 1");
        }
        if self.openai.dims < 1 {
            bail!("openai.dims must be >= 1");
        }
        if !(0.0..=2.0).contains(&self.openai.temperature) {
            bail!("openai.temperature must be in [0.0, 2.0]");
        }
        if !(1..=MAX_TOKEN_TTL_MINUTES).contains(&self.auth.token_ttl_minutes) {
            bail!("auth.token_ttl_minutes must be in [1, {}]", MAX_TOKEN_TTL_MINUTES);
        }
        self.qdrant.distance()?;

        Ok(())
    }
}

/// Parse configuration from TOML text and validate it.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}
