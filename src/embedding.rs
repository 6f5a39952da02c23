//! Embedding backends.
//!
//! Implements [`Embedder`] for:
//! - **[`DisabledEmbedder`]**: always fails; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]**: `POST {url}/v1/embeddings`, one request per batch.
//! - **[`OllamaEmbedder`]**: `POST {url}/api/embed` on a local Ollama instance.
//!
//! Input normalization and the count check live in
//! [`docrag_core::embedding::embed_many`]; backends only move bytes.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use docrag::config::EmbeddingConfig;
//! # use docrag::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! Retries are off by default (`max_retries = 0`). When enabled:
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, … capped at 32s)
//! - other HTTP 4xx → fail immediately
//! - network errors → retry

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docrag_core::embedding::{EmbedError, Embedder};
use tracing::warn;

use crate::config::EmbeddingConfig;

pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OPENAI_DIMS: usize = 1536;
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

// ============ Disabled ============

/// An embedder that always returns [`EmbedError::Disabled`].
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

// ============ Shared HTTP plumbing ============

struct HttpBackend {
    client: reqwest::Client,
    max_retries: u32,
    label: &'static str,
}

impl HttpBackend {
    fn new(config: &EmbeddingConfig, label: &'static str) -> Result<Self, EmbedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbedError::Service(e.to_string()))?;
        Ok(Self {
            client,
            max_retries: config.max_retries,
            label,
        })
    }

    /// POST `body` to `url`, retrying transient failures, and return the JSON reply.
    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, EmbedError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!(
                    provider = self.label,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "retrying embedding request"
                );
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(url).json(body);
            if let Some(token) = bearer {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json().await.map_err(|e| {
                            EmbedError::Service(format!("{} returned invalid JSON: {e}", self.label))
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = EmbedError::Service(format!(
                        "{} API error {}: {}",
                        self.label, status, body_text
                    ));

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(EmbedError::Service(format!(
                        "{} connection error: {e}",
                        self.label
                    )));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            EmbedError::Service(format!("{} embedding failed after retries", self.label))
        }))
    }
}

fn json_to_vector(value: &serde_json::Value, label: &str) -> Result<Vec<f32>, EmbedError> {
    value
        .as_array()
        .ok_or_else(|| EmbedError::Service(format!("Invalid {label} response: embedding is not an array")))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbedError::Service(format!("Invalid {label} response: non-numeric value")))
        })
        .collect()
}

// ============ OpenAI ============

/// Embedder backed by the OpenAI embeddings API.
pub struct OpenAIEmbedder {
    http: HttpBackend,
    endpoint: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAIEmbedder {
    /// Build from config, reading the key from `OPENAI_API_KEY`.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| EmbedError::Service("OPENAI_API_KEY environment variable not set".into()))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: String) -> Result<Self, EmbedError> {
        let base = config.url.as_deref().unwrap_or(DEFAULT_OPENAI_URL);
        Ok(Self {
            http: HttpBackend::new(config, "OpenAI")?,
            endpoint: format!("{}/v1/embeddings", base.trim_end_matches('/')),
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            dims: config.dims.unwrap_or(DEFAULT_OPENAI_DIMS),
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let json = self
            .http
            .post_json(&self.endpoint, Some(&self.api_key), &body)
            .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbedError::Service("Invalid OpenAI response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .ok_or_else(|| EmbedError::Service("Invalid OpenAI response: missing embedding".into()))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, json_to_vector(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedder backed by a local Ollama instance.
pub struct OllamaEmbedder {
    http: HttpBackend,
    endpoint: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| EmbedError::Service("embedding.model required for Ollama provider".into()))?;
        let dims = config
            .dims
            .ok_or_else(|| EmbedError::Service("embedding.dims required for Ollama provider".into()))?;
        let base = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);

        Ok(Self {
            http: HttpBackend::new(config, "Ollama")?,
            endpoint: format!("{}/api/embed", base.trim_end_matches('/')),
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let json = self.http.post_json(&self.endpoint, None, &body).await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbedError::Service("Invalid Ollama response: missing embeddings array".into()))?
        .iter()
        .map(|e| json_to_vector(e, "Ollama"))
        .collect()
}

/// Create the configured [`Embedder`].
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbedError> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => Err(EmbedError::Service(format!(
            "Unknown embedding provider: {other}"
        ))),
    }
}
