//! Storage abstraction for docrag.
//!
//! The [`DocumentStore`] trait defines every persistence operation the
//! ingestion pipeline, the document endpoints, and similarity search need,
//! so backends (SQLite in the app crate, [`memory::InMemoryStore`] here)
//! are interchangeable.
//!
//! Every read that returns user data is scoped by `user_id`; a caller can
//! never see another user's documents or chunks through this trait.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Document, DocumentChunk, NewChunk, NewDocument, SearchHit};

/// Abstract storage backend for documents, chunks, and vectors.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_document`](DocumentStore::create_document) | Insert a document in `processing` state |
/// | [`complete_document`](DocumentStore::complete_document) | Atomically store chunks + vectors and mark `completed` |
/// | [`mark_failed`](DocumentStore::mark_failed) | Move a non-terminal document to `failed` |
/// | [`get_document`](DocumentStore::get_document) | Fetch one document owned by a user |
/// | [`list_documents`](DocumentStore::list_documents) | A user's documents, newest first |
/// | [`list_chunks`](DocumentStore::list_chunks) | A document's chunks in index order |
/// | [`delete_document`](DocumentStore::delete_document) | Delete a document and its chunks |
/// | [`delete_user_documents`](DocumentStore::delete_user_documents) | Delete every document a user owns |
/// | [`nearest_chunks`](DocumentStore::nearest_chunks) | Cosine nearest neighbours within a user's chunks |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new document with status `processing` and a fresh id.
    async fn create_document(&self, doc: &NewDocument) -> Result<Document>;

    /// Store all chunks with their vectors and mark the document `completed`,
    /// as one atomic unit. Either every chunk lands and the status flips, or
    /// nothing changes.
    ///
    /// Inside the unit, chunk rows are written first and their vectors are
    /// attached afterwards, so backends may stage rows without embeddings.
    ///
    /// `chunks` and `vectors` must have equal length. Fails if the document
    /// is not in `processing` state. Returns the number of chunks stored.
    async fn complete_document(
        &self,
        document_id: &str,
        chunks: &[NewChunk],
        vectors: &[Vec<f32>],
    ) -> Result<usize>;

    /// Mark a `pending`/`processing` document `failed` and stamp
    /// `processed_at`. Terminal documents are left alone. Returns whether a
    /// row changed.
    async fn mark_failed(&self, document_id: &str) -> Result<bool>;

    async fn get_document(&self, user_id: &str, document_id: &str) -> Result<Option<Document>>;

    /// All of a user's documents ordered by `uploaded_at` descending.
    async fn list_documents(&self, user_id: &str) -> Result<Vec<Document>>;

    /// Chunks of a document ordered by `chunk_index`.
    async fn list_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>>;

    /// Delete a user's document and all of its chunks. Returns `false` when
    /// no such document exists for that user.
    async fn delete_document(&self, user_id: &str, document_id: &str) -> Result<bool>;

    /// Delete all of a user's documents and their chunks. Returns how many
    /// documents were removed.
    async fn delete_user_documents(&self, user_id: &str) -> Result<u64>;

    /// Up to `limit` chunks owned by `user_id`, ordered by ascending cosine
    /// distance to `query`. Chunks without vectors are skipped. No score
    /// threshold is applied here.
    async fn nearest_chunks(
        &self,
        user_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>>;
}

/// Order `(distance, hit)` pairs by ascending distance and keep `limit`.
///
/// The sort is stable, so ties keep their input order.
pub fn rank_by_distance(mut scored: Vec<(f64, SearchHit)>, limit: usize) -> Vec<SearchHit> {
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored.into_iter().map(|(_, hit)| hit).collect()
}
