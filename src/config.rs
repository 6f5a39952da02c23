//! TOML configuration for docrag.
//!
//! Only `[db]` is required; every other section has defaults matching the
//! documented behaviour (100/20 chunking, top-5 search at 0.7, 10 MiB
//! uploads, 30 s persist timeout).
//!
//! ```toml
//! [db]
//! path = "./data/docrag.sqlite"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [storage]
//! root = "./data/blobs"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docrag_core::chunk::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use docrag_core::file_type::DEFAULT_MAX_UPLOAD_BYTES;
use docrag_core::search::{DEFAULT_MIN_SCORE, DEFAULT_SEARCH_LIMIT};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
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
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
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
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SEARCH_LIMIT,
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

fn default_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}
fn default_min_score() -> f64 {
    DEFAULT_MIN_SCORE
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override. OpenAI: `https://api.openai.com`; Ollama: `http://localhost:11434`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            max_retries: 0,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_persist_timeout_secs")]
    pub persist_timeout_secs: u64,
    /// Capacity of the per-upload progress channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            persist_timeout_secs: 30,
            event_buffer: 16,
        }
    }
}

impl UploadConfig {
    pub fn persist_timeout(&self) -> Duration {
        Duration::from_secs(self.persist_timeout_secs)
    }
}

fn default_max_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}
fn default_persist_timeout_secs() -> u64 {
    30
}
fn default_event_buffer() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// When set, blob URIs are `{public_base_url}/{key}` instead of `file://` paths.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            public_base_url: None,
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/blobs")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    if config.retrieval.limit < 1 {
        bail!("retrieval.limit must be >= 1");
    }
    if !(-1.0..=1.0).contains(&config.retrieval.min_score) {
        bail!("retrieval.min_score must be in [-1.0, 1.0]");
    }

    if config.upload.max_bytes == 0 {
        bail!("upload.max_bytes must be > 0");
    }
    if config.upload.persist_timeout_secs == 0 {
        bail!("upload.persist_timeout_secs must be > 0");
    }
    if config.upload.event_buffer == 0 {
        bail!("upload.event_buffer must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.embedding.provider == "ollama" {
        if config.embedding.model.is_none() {
            bail!("embedding.model must be specified when provider is 'ollama'");
        }
        if config.embedding.dims.unwrap_or(0) == 0 {
            bail!("embedding.dims must be > 0 when provider is 'ollama'");
        }
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0 when set");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse_config("[db]\npath = \"./data/docrag.sqlite\"\n").unwrap();
        assert_eq!(cfg.chunking.chunk_size, 100);
        assert_eq!(cfg.chunking.chunk_overlap, 20);
        assert_eq!(cfg.retrieval.limit, 5);
        assert!((cfg.retrieval.min_score - 0.7).abs() < f64::EPSILON);
        assert_eq!(cfg.upload.max_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.upload.persist_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.embedding.max_retries, 0);
        assert!(!cfg.embedding.is_enabled());
    }

    #[test]
    fn overlap_must_be_below_size() {
        let err = parse_config(
            "[db]\npath = \"x\"\n[chunking]\nchunk_size = 10\nchunk_overlap = 10\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn ollama_requires_model_and_dims() {
        let err = parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"ollama\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn openai_defaults_are_allowed() {
        let cfg = parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\n").unwrap();
        assert!(cfg.embedding.is_enabled());
        assert!(cfg.embedding.model.is_none());
    }
}
