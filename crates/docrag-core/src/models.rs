//! Core data models for uploaded documents, their chunks, and search hits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing status of a [`Document`].
///
/// Status only moves forward: `pending`/`processing` may become `completed`
/// or `failed`, and terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "processing" => Some(DocumentStatus::Processing),
            "completed" => Some(DocumentStatus::Completed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the forward-only lifecycle.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        match self {
            DocumentStatus::Pending => next != DocumentStatus::Pending,
            DocumentStatus::Processing => next.is_terminal(),
            DocumentStatus::Completed | DocumentStatus::Failed => false,
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded document owned by a single user.
///
/// Carries metadata only; chunk text and vectors are stored separately.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    /// Resolvable URI of the raw upload in blob storage.
    pub file_path: String,
    pub status: DocumentStatus,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Fields needed to create a [`Document`] row.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub user_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: i64,
    pub file_path: String,
}

/// A stored chunk of a document's extracted text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub chunk_index: i64,
    #[serde(skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// A chunk ready to be persisted, before it has an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewChunk {
    pub content: String,
    pub chunk_index: i64,
    pub metadata: Option<serde_json::Value>,
}

impl NewChunk {
    /// Number the given chunk texts from 0, attaching the same metadata to each.
    pub fn from_texts(texts: Vec<String>, metadata: Option<serde_json::Value>) -> Vec<NewChunk> {
        texts
            .into_iter()
            .enumerate()
            .map(|(i, content)| NewChunk {
                content,
                chunk_index: i as i64,
                metadata: metadata.clone(),
            })
            .collect()
    }
}

/// A chunk returned from similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub document_id: String,
    /// `1 - cosine_distance`; roughly in `[0, 1]` for embedding models.
    pub similarity: f64,
}
