//! User-scoped semantic search over stored chunks.
//!
//! The search algorithm operates entirely through the [`DocumentStore`] and
//! [`Embedder`] traits, with no database or HTTP dependencies.
//!
//! # Algorithm
//!
//! 1. Blank queries return no results without calling the embedder.
//! 2. Embed the query (newlines normalized, single request).
//! 3. Ask the store for the `limit` nearest chunks owned by `user_id`,
//!    ordered by ascending cosine distance.
//! 4. Keep only hits whose `similarity >= min_score`.
//!
//! The threshold is applied *after* the limit, so fewer than `limit`
//! results (possibly zero) may come back even when more chunks exist.

use thiserror::Error;
use tracing::debug;

use crate::embedding::{embed_one, EmbedError, Embedder};
use crate::models::SearchHit;
use crate::store::DocumentStore;

pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const DEFAULT_MIN_SCORE: f64 = 0.7;

/// Inputs for a single search call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub query: String,
    pub user_id: String,
    pub limit: usize,
    pub min_score: f64,
}

impl SearchOptions {
    /// Options with the default limit (5) and threshold (0.7).
    pub fn new(query: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id: user_id.into(),
            limit: DEFAULT_SEARCH_LIMIT,
            min_score: DEFAULT_MIN_SCORE,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("failed to embed search query: {0}")]
    Embedding(#[from] EmbedError),

    #[error("vector search failed: {0:#}")]
    Store(anyhow::Error),
}

/// Run a semantic search for one user.
pub async fn semantic_search(
    store: &dyn DocumentStore,
    embedder: &dyn Embedder,
    opts: &SearchOptions,
) -> Result<Vec<SearchHit>, SearchError> {
    if opts.query.trim().is_empty() || opts.limit == 0 {
        return Ok(Vec::new());
    }

    let query_vec = embed_one(embedder, &opts.query).await?;
    let candidates = store
        .nearest_chunks(&opts.user_id, &query_vec, opts.limit)
        .await
        .map_err(SearchError::Store)?;

    debug!(
        rows = candidates.len(),
        top_similarity = candidates.first().map(|h| h.similarity),
        "vector search candidates"
    );

    Ok(apply_threshold(candidates, opts.min_score))
}

/// Drop hits below `min_score`, preserving order.
pub fn apply_threshold(hits: Vec<SearchHit>, min_score: f64) -> Vec<SearchHit> {
    hits.into_iter()
        .filter(|h| h.similarity >= min_score)
        .collect()
}
