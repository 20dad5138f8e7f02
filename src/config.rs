use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.pdf".to_string(),
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks handed to the answer generator.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Candidate pool size before diversity re-ranking. The retriever always
    /// uses at least `2 × k`.
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    /// MMR trade-off: 1.0 = pure relevance, 0.0 = pure diversity.
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            fetch_k: default_fetch_k(),
            mmr_lambda: default_mmr_lambda(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_fetch_k() -> usize {
    40
}
fn default_mmr_lambda() -> f32 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent in-flight embedding batches during indexing.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_embed_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            base_url: default_embedding_base_url(),
            api_key_env: default_embedding_key_env(),
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            max_retries: default_embed_retries(),
            timeout_secs: default_embed_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_concurrency() -> usize {
    4
}
fn default_embed_retries() -> u32 {
    5
}
fn default_embed_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_generation_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    #[serde(default = "default_gen_retries")]
    pub max_retries: u32,
    #[serde(default = "default_gen_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            base_url: default_generation_base_url(),
            api_key_env: default_generation_key_env(),
            max_output_tokens: default_max_output_tokens(),
            stop_sequences: Vec::new(),
            max_retries: default_gen_retries(),
            timeout_secs: default_gen_timeout(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_generation_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_generation_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_max_output_tokens() -> u32 {
    512
}
fn default_gen_retries() -> u32 {
    3
}
fn default_gen_timeout() -> u64 {
    60
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::config(format!("failed to read config file {}: {}", path.display(), e))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| PipelineError::config(format!("failed to parse config file: {}", e)))?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        return Err(PipelineError::config("chunking.chunk_size must be > 0"));
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        return Err(PipelineError::config(format!(
            "chunking.overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.overlap, config.chunking.chunk_size
        )));
    }

    if config.retrieval.top_k == 0 {
        return Err(PipelineError::config("retrieval.top_k must be >= 1"));
    }
    if !(0.0..=1.0).contains(&config.retrieval.mmr_lambda) {
        return Err(PipelineError::config(
            "retrieval.mmr_lambda must be in [0.0, 1.0]",
        ));
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => {
            return Err(PipelineError::config(format!(
                "unknown embedding provider '{}': must be disabled or openai",
                other
            )))
        }
    }
    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            return Err(PipelineError::config(format!(
                "embedding.model must be set when provider is '{}'",
                config.embedding.provider
            )));
        }
        if config.embedding.dims.unwrap_or(0) == 0 {
            return Err(PipelineError::config(format!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            )));
        }
        if config.embedding.batch_size == 0 || config.embedding.max_concurrency == 0 {
            return Err(PipelineError::config(
                "embedding.batch_size and embedding.max_concurrency must be >= 1",
            ));
        }
    }

    match config.generation.provider.as_str() {
        "disabled" | "groq" => {}
        other => {
            return Err(PipelineError::config(format!(
                "unknown generation provider '{}': must be disabled or groq",
                other
            )))
        }
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        return Err(PipelineError::config(format!(
            "generation.model must be set when provider is '{}'",
            config.generation.provider
        )));
    }

    Ok(())
}
