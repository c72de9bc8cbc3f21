//! TOML configuration.
//!
//! Every section except `[db]` is optional; omitted keys take the
//! defaults below. [`load_config`] parses and validates the file.
//!
//! ```toml
//! [db]
//! path = "./data/docchat.sqlite"
//!
//! [storage]
//! upload_dir = "./data/uploads"
//! max_upload_mb = 25
//!
//! [embedding]
//! dims = 768
//! ollama_url = "http://localhost:11434"
//!
//! [pricing."gpt-4o-mini"]
//! input_per_1m = 0.15
//! output_per_1m = 0.60
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use docchat_core::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use docchat_core::embedding::DEFAULT_DIMS;
use docchat_core::pricing::{ModelPrice, PriceTable};
use docchat_core::quota::DEFAULT_ESTIMATED_TOKENS;
use docchat_core::retrieval::{self, RetrievalParams};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub pricing: HashMap<String, ModelPrice>,
}

impl Config {
    pub fn price_table(&self) -> PriceTable {
        PriceTable::with_overrides(&self.pricing)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}
fn default_max_upload_mb() -> u64 {
    25
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_small_corpus_threshold")]
    pub small_corpus_threshold: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_per_document")]
    pub max_per_document: usize,
    #[serde(default = "default_keyword_limit")]
    pub keyword_limit: usize,
    #[serde(default = "default_keyword_scan_window")]
    pub keyword_scan_window: usize,
    #[serde(default = "default_keyword_score")]
    pub keyword_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            small_corpus_threshold: default_small_corpus_threshold(),
            top_k: default_top_k(),
            max_per_document: default_max_per_document(),
            keyword_limit: default_keyword_limit(),
            keyword_scan_window: default_keyword_scan_window(),
            keyword_score: default_keyword_score(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            small_corpus_threshold: self.small_corpus_threshold,
            top_k: self.top_k,
            max_per_document: self.max_per_document,
            keyword_limit: self.keyword_limit,
            keyword_scan_window: self.keyword_scan_window,
            keyword_score: self.keyword_score,
        }
    }
}

fn default_small_corpus_threshold() -> usize {
    retrieval::DEFAULT_SMALL_CORPUS_THRESHOLD
}
fn default_top_k() -> usize {
    retrieval::DEFAULT_TOP_K
}
fn default_max_per_document() -> usize {
    retrieval::DEFAULT_MAX_PER_DOCUMENT
}
fn default_keyword_limit() -> usize {
    retrieval::DEFAULT_KEYWORD_LIMIT
}
fn default_keyword_scan_window() -> usize {
    retrieval::DEFAULT_KEYWORD_SCAN_WINDOW
}
fn default_keyword_score() -> f32 {
    retrieval::DEFAULT_KEYWORD_SCORE
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    /// Ollama model used when a selector is unknown or its credential is invalid.
    #[serde(default = "default_local_embedding_model")]
    pub default_local_model: String,
    #[serde(default = "default_openai_embedding_model")]
    pub openai_model: String,
    #[serde(default = "default_openai_url")]
    pub openai_url: String,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    /// Timeout for model listing and other metadata lookups.
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dims: default_dims(),
            batch_size: default_embedding_batch_size(),
            default_local_model: default_local_embedding_model(),
            openai_model: default_openai_embedding_model(),
            openai_url: default_openai_url(),
            ollama_url: default_ollama_url(),
            timeout_secs: default_embedding_timeout_secs(),
            metadata_timeout_secs: default_metadata_timeout_secs(),
        }
    }
}

fn default_dims() -> usize {
    DEFAULT_DIMS
}
fn default_embedding_batch_size() -> usize {
    100
}
fn default_local_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_openai_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_timeout_secs() -> u64 {
    60
}
fn default_metadata_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default = "default_openai_url")]
    pub openai_url: String,
    #[serde(default = "default_anthropic_url")]
    pub anthropic_url: String,
    #[serde(default = "default_gemini_url")]
    pub gemini_url: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Sampling temperature for external providers. Local models always run at 0.0.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            openai_url: default_openai_url(),
            anthropic_url: default_anthropic_url(),
            gemini_url: default_gemini_url(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_anthropic_url() -> String {
    "https://api.anthropic.com/v1".to_string()
}
fn default_gemini_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}
fn default_max_output_tokens() -> u32 {
    800
}
fn default_temperature() -> f32 {
    0.2
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    #[serde(default = "default_estimated_tokens")]
    pub estimated_tokens_per_query: i64,
    /// Give the reserved estimate back when generation fails.
    #[serde(default)]
    pub refund_on_failure: bool,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            estimated_tokens_per_query: default_estimated_tokens(),
            refund_on_failure: false,
        }
    }
}

fn default_estimated_tokens() -> i64 {
    DEFAULT_ESTIMATED_TOKENS
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.size == 0 {
        anyhow::bail!("chunking.size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.size");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_per_document == 0 {
        anyhow::bail!("retrieval.max_per_document must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.keyword_score) {
        anyhow::bail!("retrieval.keyword_score must be in [0.0, 1.0]");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.default_local_model.trim().is_empty() {
        anyhow::bail!("embedding.default_local_model must not be empty");
    }

    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if config.generation.max_output_tokens == 0 {
        anyhow::bail!("generation.max_output_tokens must be > 0");
    }

    if config.quota.estimated_tokens_per_query < 0 {
        anyhow::bail!("quota.estimated_tokens_per_query must be >= 0");
    }
    if config.storage.max_upload_mb == 0 {
        anyhow::bail!("storage.max_upload_mb must be > 0");
    }

    for (model, price) in &config.pricing {
        if price.input_per_1m < 0.0 || price.output_per_1m < 0.0 {
            anyhow::bail!("pricing.\"{}\" must not be negative", model);
        }
    }

    Ok(config)
}
