//! Per-user document listing, lookup, and deletion.
//!
//! Used by both the `docrag documents` CLI commands and the
//! `GET/DELETE /api/documents` and `DELETE /api/user/data` HTTP routes.

use anyhow::{bail, Result};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use docrag_core::models::{Document, DocumentChunk};
use docrag_core::store::DocumentStore;

use crate::blob::BlobStore;

/// Result of [`delete_document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// A document with its chunks, for `docrag documents show`.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub document: Document,
    pub chunks: Vec<DocumentChunk>,
}

/// The user's documents, newest first. Metadata only.
pub async fn list_documents(store: &dyn DocumentStore, user_id: &str) -> Result<Vec<Document>> {
    store.list_documents(user_id).await
}

/// A single document and its chunks, or `None` if the user does not own it.
pub async fn get_document_detail(
    store: &dyn DocumentStore,
    user_id: &str,
    document_id: &str,
) -> Result<Option<DocumentDetail>> {
    let Some(document) = store.get_document(user_id, document_id).await? else {
        return Ok(None);
    };
    let chunks = store.list_chunks(&document.id).await?;
    Ok(Some(DocumentDetail { document, chunks }))
}

/// Delete a document owned by `user_id`.
///
/// The raw upload is removed first; a failure there is logged and does not
/// stop the row (and its chunks) from being deleted.
pub async fn delete_document(
    store: &dyn DocumentStore,
    blobs: &dyn BlobStore,
    user_id: &str,
    document_id: &str,
) -> Result<DeleteOutcome> {
    let Some(document) = store.get_document(user_id, document_id).await? else {
        return Ok(DeleteOutcome::NotFound);
    };

    if let Err(e) = blobs.delete(&document.file_path).await {
        warn!(document_id, uri = %document.file_path, error = %e, "failed to delete blob");
    }

    if !store.delete_document(user_id, document_id).await? {
        // Removed concurrently between lookup and delete.
        return Ok(DeleteOutcome::NotFound);
    }

    info!(document_id, user_id, "document deleted");
    Ok(DeleteOutcome::Deleted)
}

/// Delete every document `user_id` owns, with their chunks and raw uploads.
///
/// Blob deletes run concurrently and are best effort; failures are logged.
/// Returns the number of documents removed.
pub async fn delete_all_for_user(
    store: &dyn DocumentStore,
    blobs: &dyn BlobStore,
    user_id: &str,
) -> Result<u64> {
    let docs = store.list_documents(user_id).await?;

    let results = join_all(docs.iter().map(|doc| blobs.delete(&doc.file_path))).await;
    for (doc, result) in docs.iter().zip(results) {
        if let Err(e) = result {
            warn!(document_id = %doc.id, uri = %doc.file_path, error = %e, "failed to delete blob");
        }
    }

    let deleted = store.delete_user_documents(user_id).await?;
    info!(user_id, deleted, "user documents deleted");
    Ok(deleted)
}

/// CLI entry point for `docrag documents list`.
pub async fn run_list(store: &dyn DocumentStore, user_id: &str, json_output: bool) -> Result<()> {
    let docs = list_documents(store, user_id).await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&docs)?);
        return Ok(());
    }
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10}  {:>10}  {:<20}  FILE",
        "ID", "STATUS", "BYTES", "UPLOADED"
    );
    for doc in &docs {
        println!(
            "{:<36}  {:<10}  {:>10}  {:<20}  {}",
            doc.id,
            doc.status.as_str(),
            doc.file_size,
            doc.uploaded_at.format("%Y-%m-%dT%H:%M:%SZ"),
            doc.file_name
        );
    }
    Ok(())
}

/// CLI entry point for `docrag documents show`.
pub async fn run_show(store: &dyn DocumentStore, user_id: &str, document_id: &str) -> Result<()> {
    let Some(detail) = get_document_detail(store, user_id, document_id).await? else {
        bail!("document not found: {}", document_id);
    };
    let doc = &detail.document;

    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!("file_name:    {}", doc.file_name);
    println!("file_type:    {}", doc.file_type);
    println!("file_size:    {}", doc.file_size);
    println!("file_path:    {}", doc.file_path);
    println!("status:       {}", doc.status);
    println!("uploaded_at:  {}", doc.uploaded_at.to_rfc3339());
    if let Some(processed) = doc.processed_at {
        println!("processed_at: {}", processed.to_rfc3339());
    }
    println!();

    println!("--- Chunks ({}) ---", detail.chunks.len());
    for chunk in &detail.chunks {
        println!("[chunk {}]", chunk.chunk_index);
        println!("{}", chunk.content);
        println!();
    }
    Ok(())
}

/// CLI entry point for `docrag documents delete`.
pub async fn run_delete(
    store: &dyn DocumentStore,
    blobs: &dyn BlobStore,
    user_id: &str,
    document_id: &str,
) -> Result<()> {
    match delete_document(store, blobs, user_id, document_id).await? {
        DeleteOutcome::Deleted => {
            println!("Deleted {}", document_id);
            Ok(())
        }
        DeleteOutcome::NotFound => bail!("document not found: {}", document_id),
    }
}

/// CLI entry point for `docrag documents purge`.
pub async fn run_purge(store: &dyn DocumentStore, blobs: &dyn BlobStore, user_id: &str) -> Result<()> {
    let deleted = delete_all_for_user(store, blobs, user_id).await?;
    println!("Deleted {} documents for {}", deleted, user_id);
    Ok(())
}
