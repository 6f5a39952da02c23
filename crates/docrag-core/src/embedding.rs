//! Embedding trait, request normalization, and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! plus the [`embed_many`] / [`embed_one`] entry points that normalize input
//! and enforce the one-vector-per-input post-condition.
//!
//! Concrete backends (OpenAI, Ollama) live in the `docrag` app crate.

use async_trait::async_trait;
use thiserror::Error;

/// Errors produced while embedding text.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The external embedding service failed or returned an unusable response.
    #[error("embedding service error: {0}")]
    Service(String),

    /// The service returned a different number of vectors than inputs sent.
    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    /// Embeddings are not configured.
    #[error("embedding provider is disabled")]
    Disabled,
}

/// A backend that turns text into fixed-dimension vectors.
///
/// Implementations send one request per call to [`Embedder::embed_batch`]
/// and return vectors in input order. Callers should go through
/// [`embed_many`] and [`embed_one`], which normalize input and check the
/// response count.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed already-normalized inputs in a single request.
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// Replace newlines with spaces; embedding models are sensitive to raw newlines.
pub fn normalize_input(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Embed a batch of texts, returning one vector per input in input order.
///
/// An empty input slice returns an empty result without calling the backend.
pub async fn embed_many(
    embedder: &dyn Embedder,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let inputs: Vec<String> = texts.iter().map(|t| normalize_input(t)).collect();
    let vectors = embedder.embed_batch(&inputs).await?;
    if vectors.len() != inputs.len() {
        return Err(EmbedError::CountMismatch {
            expected: inputs.len(),
            actual: vectors.len(),
        });
    }
    Ok(vectors)
}

/// Embed a single text (e.g. a search query).
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, EmbedError> {
    let mut vectors = embed_many(embedder, &[text.to_string()]).await?;
    vectors.pop().ok_or(EmbedError::CountMismatch {
        expected: 1,
        actual: 0,
    })
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use docrag_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`]. Trailing partial values are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, and zero vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance (`1 - cosine_similarity`), the ranking key for search.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b) as f64
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Deterministic embedder for tests: maps each input through a closure
    /// and records every batch it receives.
    pub struct FnEmbedder<F: Fn(&str) -> Vec<f32> + Send + Sync> {
        pub f: F,
        pub calls: Mutex<Vec<Vec<String>>>,
    }

    impl<F: Fn(&str) -> Vec<f32> + Send + Sync> FnEmbedder<F> {
        pub fn new(f: F) -> Self {
            Self {
                f,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl<F: Fn(&str) -> Vec<f32> + Send + Sync> Embedder for FnEmbedder<F> {
        fn model_name(&self) -> &str {
            "test"
        }
        fn dims(&self) -> usize {
            0
        }
        async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.lock().unwrap().push(inputs.to_vec());
            Ok(inputs.iter().map(|t| (self.f)(t)).collect())
        }
    }
}
