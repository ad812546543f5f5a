//! Configuration parsing and validation.
//!
//! Configuration comes from a TOML file (default `config/docqa.toml`) with
//! environment overrides applied on top. A missing file means all
//! defaults; a present but malformed file is an error.
//!
//! # Example
//!
//! ```toml
//! [index]
//! backend = "qdrant"
//! qdrant_url = "https://my-cluster.cloud.qdrant.io:6334"
//! collection = "handbook"
//!
//! [chunking]
//! chunk_size = 800
//! chunk_overlap = 100
//!
//! [embedding]
//! provider = "gemini"
//! model = "models/text-embedding-004"
//!
//! [generation]
//! provider = "gemini"
//! model = "gemini-2.5-flash"
//! ```
//!
//! # Environment overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `DOCQA_EMBEDDING_PROVIDER` | `embedding.provider` |
//! | `DOCQA_EMBEDDING_MODEL` | `embedding.model` |
//! | `DOCQA_GENERATION_PROVIDER` | `generation.provider` |
//! | `DOCQA_GENERATION_MODEL` | `generation.model` |
//! | `DOCQA_INDEX_BACKEND` | `index.backend` |
//! | `DOCQA_INDEX_PATH` | `index.path` |
//! | `QDRANT_URL` | `index.qdrant_url` |
//! | `QDRANT_API_KEY` | `index.qdrant_api_key` |
//! | `QDRANT_COLLECTION` | `index.collection` |
//! | `DOCQA_BATCH_SIZE` | `ingest.batch_size` |
//! | `DOCQA_TOP_K` | `retrieval.k` |
//! | `DOCQA_CHUNK_SIZE` | `chunking.chunk_size` |
//! | `DOCQA_CHUNK_OVERLAP` | `chunking.chunk_overlap` |
//! | `DOCQA_HISTORY_DIR` | `history.dir` |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use docqa_core::chunk::SplitterConfig;
use serde::Deserialize;

use crate::retry::Backoff;

pub const DEFAULT_CONFIG_PATH: &str = "config/docqa.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// `"local"` or `"qdrant"`.
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Root directory of the local backend.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub qdrant_url: Option<String>,
    #[serde(default)]
    pub qdrant_api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_index_path(),
            collection: default_collection(),
            qdrant_url: None,
            qdrant_api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "local".to_string()
}
fn default_index_path() -> PathBuf {
    PathBuf::from("data/index")
}
fn default_collection() -> String {
    "documents".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn splitter(&self) -> Result<SplitterConfig> {
        Ok(SplitterConfig::new(self.chunk_size, self.chunk_overlap)?)
    }
}

fn default_chunk_size() -> usize {
    docqa_core::chunk::DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    docqa_core::chunk::DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { k: default_k() }
    }
}

fn default_k() -> usize {
    docqa_core::store::DEFAULT_TOP_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Attempts per batch, including the first.
    #[serde(default = "default_batch_attempts")]
    pub max_attempts: u32,
    /// Fixed wait after a quota or rate-limit failure.
    #[serde(default = "default_quota_backoff_secs")]
    pub quota_backoff_secs: u64,
    /// Pause between successful batches.
    #[serde(default = "default_batch_delay_secs")]
    pub batch_delay_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_attempts: default_batch_attempts(),
            quota_backoff_secs: default_quota_backoff_secs(),
            batch_delay_secs: default_batch_delay_secs(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}
fn default_batch_attempts() -> u32 {
    3
}
fn default_quota_backoff_secs() -> u64 {
    30
}
fn default_batch_delay_secs() -> u64 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    #[serde(default = "default_answer_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_answer_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
        }
    }
}

impl AnswerConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::exponential(
            self.max_attempts,
            Duration::from_secs(self.backoff_base_secs),
            Duration::from_secs(self.backoff_cap_secs),
        )
    }
}

fn default_answer_attempts() -> u32 {
    5
}
fn default_backoff_base_secs() -> u64 {
    2
}
fn default_backoff_cap_secs() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"gemini"` or `"openai"`.
    #[serde(default = "default_gemini")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Override for the provider's API base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key. Defaults to
    /// `GOOGLE_API_KEY` for gemini and `OPENAI_API_KEY` for openai.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_gemini(),
            model: default_embedding_model(),
            base_url: None,
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_gemini() -> String {
    "gemini".to_string()
}
fn default_embedding_model() -> String {
    "models/text-embedding-004".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `"gemini"` or `"openai"`.
    #[serde(default = "default_gemini")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_gemini(),
            model: default_generation_model(),
            temperature: 0.0,
            base_url: None,
            api_key_env: None,
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Run the retention sweep before every session listing.
    #[serde(default)]
    pub sweep_on_list: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: default_history_dir(),
            retention_days: default_retention_days(),
            sweep_on_list: false,
        }
    }
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("data/chats")
}
fn default_retention_days() -> u32 {
    7
}

const PROVIDERS: [&str; 2] = ["gemini", "openai"];
const BACKENDS: [&str; 2] = ["local", "qdrant"];

/// Load configuration from `path` (or the default path), apply
/// environment overrides and validate.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be parsed, if an
/// override does not parse, or if validation fails.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    } else {
        Config::default()
    };
    apply_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Apply environment-style overrides using `lookup` for variable values.
pub fn apply_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let string = |key: &str, target: &mut String| {
        if let Some(v) = lookup(key).filter(|v| !v.is_empty()) {
            *target = v;
        }
    };
    string("DOCQA_EMBEDDING_PROVIDER", &mut config.embedding.provider);
    string("DOCQA_EMBEDDING_MODEL", &mut config.embedding.model);
    string("DOCQA_GENERATION_PROVIDER", &mut config.generation.provider);
    string("DOCQA_GENERATION_MODEL", &mut config.generation.model);
    string("DOCQA_INDEX_BACKEND", &mut config.index.backend);
    string("QDRANT_COLLECTION", &mut config.index.collection);

    if let Some(v) = lookup("DOCQA_INDEX_PATH").filter(|v| !v.is_empty()) {
        config.index.path = PathBuf::from(v);
    }
    if let Some(v) = lookup("DOCQA_HISTORY_DIR").filter(|v| !v.is_empty()) {
        config.history.dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("QDRANT_URL").filter(|v| !v.is_empty()) {
        config.index.qdrant_url = Some(v);
    }
    if let Some(v) = lookup("QDRANT_API_KEY").filter(|v| !v.is_empty()) {
        config.index.qdrant_api_key = Some(v);
    }

    parse_override(&lookup, "DOCQA_BATCH_SIZE", &mut config.ingest.batch_size)?;
    parse_override(&lookup, "DOCQA_TOP_K", &mut config.retrieval.k)?;
    parse_override(&lookup, "DOCQA_CHUNK_SIZE", &mut config.chunking.chunk_size)?;
    parse_override(&lookup, "DOCQA_CHUNK_OVERLAP", &mut config.chunking.chunk_overlap)?;
    Ok(())
}

fn parse_override<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key).filter(|v| !v.is_empty()) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a non-negative integer, got '{}'", key, raw))?;
    }
    Ok(())
}

/// Reject configurations the pipeline cannot run with.
pub fn validate(config: &Config) -> Result<()> {
    config.chunking.splitter()?;

    if config.retrieval.k == 0 {
        bail!("retrieval.k must be > 0");
    }
    if config.ingest.batch_size == 0 {
        bail!("ingest.batch_size must be > 0");
    }
    if config.ingest.max_attempts == 0 || config.answer.max_attempts == 0 {
        bail!("ingest.max_attempts and answer.max_attempts must be > 0");
    }
    if config.answer.backoff_cap_secs < config.answer.backoff_base_secs {
        bail!("answer.backoff_cap_secs must be >= answer.backoff_base_secs");
    }
    if !PROVIDERS.contains(&config.embedding.provider.as_str()) {
        bail!(
            "Unknown embedding provider: '{}'. Must be gemini or openai.",
            config.embedding.provider
        );
    }
    if !PROVIDERS.contains(&config.generation.provider.as_str()) {
        bail!(
            "Unknown generation provider: '{}'. Must be gemini or openai.",
            config.generation.provider
        );
    }
    if config.embedding.model.trim().is_empty() || config.generation.model.trim().is_empty() {
        bail!("embedding.model and generation.model must not be empty");
    }
    if !BACKENDS.contains(&config.index.backend.as_str()) {
        bail!(
            "Unknown index backend: '{}'. Must be local or qdrant.",
            config.index.backend
        );
    }
    if config.index.backend == "qdrant" && config.index.qdrant_url.is_none() {
        bail!("index.qdrant_url (or QDRANT_URL) is required for the qdrant backend");
    }
    if config.index.collection.trim().is_empty() {
        bail!("index.collection must not be empty");
    }
    Ok(())
}
