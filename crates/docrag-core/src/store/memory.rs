//! In-memory [`DocumentStore`] implementation for tests and embedding.
//!
//! Keeps documents and chunks in a single `RwLock`ed state so that
//! [`complete_document`](DocumentStore::complete_document) is atomic with
//! respect to readers. Nearest-neighbour search is brute-force cosine
//! distance over the user's chunks.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::embedding::cosine_distance;
use crate::models::{Document, DocumentChunk, DocumentStatus, NewChunk, NewDocument, SearchHit};

use super::{rank_by_distance, DocumentStore};

#[derive(Default)]
struct State {
    docs: HashMap<String, Document>,
    /// Insertion order of document ids, used to break `uploaded_at` ties.
    order: Vec<String>,
    chunks: Vec<DocumentChunk>,
}

/// In-memory store. Cheap to construct; state is lost on drop.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn create_document(&self, doc: &NewDocument) -> Result<Document> {
        let document = Document {
            id: Uuid::new_v4().to_string(),
            user_id: doc.user_id.clone(),
            file_name: doc.file_name.clone(),
            file_type: doc.file_type.clone(),
            file_size: doc.file_size,
            file_path: doc.file_path.clone(),
            status: DocumentStatus::Processing,
            uploaded_at: Utc::now(),
            processed_at: None,
        };
        let mut state = self.write()?;
        state.order.push(document.id.clone());
        state.docs.insert(document.id.clone(), document.clone());
        Ok(document)
    }

    async fn complete_document(
        &self,
        document_id: &str,
        chunks: &[NewChunk],
        vectors: &[Vec<f32>],
    ) -> Result<usize> {
        if chunks.len() != vectors.len() {
            bail!(
                "Embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        let mut state = self.write()?;
        match state.docs.get(document_id) {
            None => bail!("document {document_id} not found"),
            Some(doc) if doc.status != DocumentStatus::Processing => {
                bail!("document {document_id} is {}, not processing", doc.status)
            }
            Some(_) => {}
        }
        if state.chunks.iter().any(|c| {
            c.document_id == document_id && chunks.iter().any(|n| n.chunk_index == c.chunk_index)
        }) {
            bail!("duplicate chunk index for document {document_id}");
        }

        for (chunk, vector) in chunks.iter().zip(vectors) {
            state.chunks.push(DocumentChunk {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                content: chunk.content.clone(),
                chunk_index: chunk.chunk_index,
                embedding: Some(vector.clone()),
                metadata: chunk.metadata.clone(),
            });
        }
        if let Some(doc) = state.docs.get_mut(document_id) {
            doc.status = DocumentStatus::Completed;
            doc.processed_at = Some(Utc::now());
        }
        Ok(chunks.len())
    }

    async fn mark_failed(&self, document_id: &str) -> Result<bool> {
        let mut state = self.write()?;
        match state.docs.get_mut(document_id) {
            Some(doc) if !doc.status.is_terminal() => {
                doc.status = DocumentStatus::Failed;
                doc.processed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_document(&self, user_id: &str, document_id: &str) -> Result<Option<Document>> {
        let state = self.read()?;
        Ok(state
            .docs
            .get(document_id)
            .filter(|d| d.user_id == user_id)
            .cloned())
    }

    async fn list_documents(&self, user_id: &str) -> Result<Vec<Document>> {
        let state = self.read()?;
        let mut docs: Vec<Document> = state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.docs.get(id))
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(docs)
    }

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let state = self.read()?;
        let mut chunks: Vec<DocumentChunk> = state
            .chunks
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn delete_document(&self, user_id: &str, document_id: &str) -> Result<bool> {
        let mut state = self.write()?;
        let owned = state
            .docs
            .get(document_id)
            .is_some_and(|d| d.user_id == user_id);
        if !owned {
            return Ok(false);
        }
        state.docs.remove(document_id);
        state.order.retain(|id| id != document_id);
        state.chunks.retain(|c| c.document_id != document_id);
        Ok(true)
    }

    async fn delete_user_documents(&self, user_id: &str) -> Result<u64> {
        let mut state = self.write()?;
        let owned: Vec<String> = state
            .docs
            .values()
            .filter(|d| d.user_id == user_id)
            .map(|d| d.id.clone())
            .collect();
        for id in &owned {
            state.docs.remove(id);
        }
        state.order.retain(|id| !owned.contains(id));
        state.chunks.retain(|c| !owned.contains(&c.document_id));
        Ok(owned.len() as u64)
    }

    async fn nearest_chunks(
        &self,
        user_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let state = self.read()?;
        let scored: Vec<(f64, SearchHit)> = state
            .chunks
            .iter()
            .filter(|c| {
                state
                    .docs
                    .get(&c.document_id)
                    .is_some_and(|d| d.user_id == user_id)
            })
            .filter_map(|c| {
                let vector = c.embedding.as_ref()?;
                let distance = cosine_distance(query, vector);
                Some((
                    distance,
                    SearchHit {
                        id: c.id.clone(),
                        content: c.content.clone(),
                        document_id: c.document_id.clone(),
                        similarity: 1.0 - distance,
                    },
                ))
            })
            .collect();
        Ok(rank_by_distance(scored, limit))
    }
}
