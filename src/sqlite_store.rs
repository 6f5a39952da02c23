//! SQLite-backed [`DocumentStore`] implementation.
//!
//! Vectors are stored as little-endian `f32` BLOBs on `document_chunks` and
//! ranked in Rust by cosine distance, scoped to one user with a join on
//! `documents.user_id`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use docrag_core::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use docrag_core::models::{
    Document, DocumentChunk, DocumentStatus, NewChunk, NewDocument, SearchHit,
};
use docrag_core::store::{rank_by_distance, DocumentStore};

const DOCUMENT_COLUMNS: &str = "id, user_id, file_name, file_type, file_size, file_path, status, uploaded_at, processed_at";

/// SQLite implementation of the [`DocumentStore`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of chunk rows for a document (used by CLI output and tests).
    pub async fn count_chunks(&self, document_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    let status = DocumentStatus::parse(&status)
        .with_context(|| format!("unknown document status in database: {status}"))?;
    let processed_at: Option<i64> = row.get("processed_at");

    Ok(Document {
        id: row.get("id"),
        user_id: row.get("user_id"),
        file_name: row.get("file_name"),
        file_type: row.get("file_type"),
        file_size: row.get("file_size"),
        file_path: row.get("file_path"),
        status,
        uploaded_at: from_millis(row.get("uploaded_at")),
        processed_at: processed_at.map(from_millis),
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
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

        sqlx::query(
            r#"
            INSERT INTO documents (id, user_id, file_name, file_type, file_size,
                                   file_path, status, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&document.id)
        .bind(&document.user_id)
        .bind(&document.file_name)
        .bind(&document.file_type)
        .bind(document.file_size)
        .bind(&document.file_path)
        .bind(document.status.as_str())
        .bind(document.uploaded_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

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

        // Dropping `tx` on any early return rolls everything back.
        let mut tx = self.pool.begin().await?;

        // Rows first, then their vectors, then the status flip.
        let mut chunk_ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let chunk_id = Uuid::new_v4().to_string();
            let metadata_json = chunk
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            sqlx::query(
                r#"
                INSERT INTO document_chunks (id, document_id, content, chunk_index, metadata_json)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk_id)
            .bind(document_id)
            .bind(&chunk.content)
            .bind(chunk.chunk_index)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert chunk {}", chunk.chunk_index))?;
            chunk_ids.push(chunk_id);
        }

        for (chunk_id, vector) in chunk_ids.iter().zip(vectors) {
            sqlx::query("UPDATE document_chunks SET embedding = ? WHERE id = ?")
                .bind(vec_to_blob(vector))
                .bind(chunk_id)
                .execute(&mut *tx)
                .await
                .context("Failed to store chunk embedding")?;
        }

        let updated = sqlx::query(
            "UPDATE documents SET status = 'completed', processed_at = ? WHERE id = ? AND status = 'processing'",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            bail!("document {document_id} is missing or no longer processing");
        }

        tx.commit().await?;
        Ok(chunks.len())
    }

    async fn mark_failed(&self, document_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET status = 'failed', processed_at = ? WHERE id = ? AND status IN ('pending', 'processing')",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(document_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_document(&self, user_id: &str, document_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ? AND user_id = ?"
        ))
        .bind(document_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_documents(&self, user_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE user_id = ? ORDER BY uploaded_at DESC, rowid DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn list_chunks(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, content, chunk_index, embedding, metadata_json
            FROM document_chunks
            WHERE document_id = ?
            ORDER BY chunk_index ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<DocumentChunk> {
                let embedding: Option<Vec<u8>> = row.get("embedding");
                let metadata_json: Option<String> = row.get("metadata_json");
                let metadata = metadata_json
                    .map(|json| serde_json::from_str(&json))
                    .transpose()?;
                Ok(DocumentChunk {
                    id: row.get("id"),
                    document_id: row.get("document_id"),
                    content: row.get("content"),
                    chunk_index: row.get("chunk_index"),
                    embedding: embedding.map(|blob| blob_to_vec(&blob)),
                    metadata,
                })
            })
            .collect()
    }

    async fn delete_document(&self, user_id: &str, document_id: &str) -> Result<bool> {
        // Chunks go with the document via ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM documents WHERE id = ? AND user_id = ?")
            .bind(document_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user_documents(&self, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM documents WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn nearest_chunks(
        &self,
        user_id: &str,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.content, c.document_id, c.embedding
            FROM document_chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.user_id = ? AND c.embedding IS NOT NULL
            ORDER BY d.uploaded_at DESC, c.chunk_index ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let scored: Vec<(f64, SearchHit)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let distance = cosine_distance(query, &blob_to_vec(&blob));
                (
                    distance,
                    SearchHit {
                        id: row.get("id"),
                        content: row.get("content"),
                        document_id: row.get("document_id"),
                        similarity: 1.0 - distance,
                    },
                )
            })
            .collect();

        Ok(rank_by_distance(scored, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn memory_store() -> SqliteStore {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        // One connection so every query sees the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        SqliteStore::new(pool)
    }

    fn new_doc(user: &str) -> NewDocument {
        NewDocument {
            user_id: user.to_string(),
            file_name: "notes.pdf".to_string(),
            file_type: "pdf".to_string(),
            file_size: 42,
            file_path: "file:///tmp/notes.pdf".to_string(),
        }
    }

    #[tokio::test]
    async fn complete_then_read_back() {
        let store = memory_store().await;
        let doc = store.create_document(&new_doc("u1")).await.unwrap();
        let chunks = NewChunk::from_texts(
            vec!["alpha".into(), "beta".into()],
            Some(serde_json::json!({"pages": 1})),
        );
        let stored = store
            .complete_document(&doc.id, &chunks, &[vec![1.0, 0.0], vec![0.0, 1.0]])
            .await
            .unwrap();
        assert_eq!(stored, 2);

        let fetched = store.get_document("u1", &doc.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, DocumentStatus::Completed);
        assert!(fetched.processed_at.is_some());

        let rows = store.list_chunks(&doc.id).await.unwrap();
        assert_eq!(rows[0].content, "alpha");
        assert_eq!(rows[1].embedding, Some(vec![0.0, 1.0]));
        assert_eq!(rows[0].metadata, Some(serde_json::json!({"pages": 1})));
    }

    #[tokio::test]
    async fn failed_completion_rolls_back() {
        let store = memory_store().await;
        let doc = store.create_document(&new_doc("u1")).await.unwrap();
        store.mark_failed(&doc.id).await.unwrap();

        let chunks = NewChunk::from_texts(vec!["alpha".into()], None);
        assert!(store
            .complete_document(&doc.id, &chunks, &[vec![1.0]])
            .await
            .is_err());
        assert_eq!(store.count_chunks(&doc.id).await.unwrap(), 0);
        let fetched = store.get_document("u1", &doc.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, DocumentStatus::Failed);
        assert!(fetched.processed_at.is_some());
    }

    #[tokio::test]
    async fn delete_user_documents_cascades_per_user() {
        let store = memory_store().await;
        let mine = store.create_document(&new_doc("alice")).await.unwrap();
        let theirs = store.create_document(&new_doc("bob")).await.unwrap();
        for id in [&mine.id, &theirs.id] {
            store
                .complete_document(id, &NewChunk::from_texts(vec!["alpha".into()], None), &[vec![1.0]])
                .await
                .unwrap();
        }

        assert_eq!(store.delete_user_documents("alice").await.unwrap(), 1);
        assert_eq!(store.count_chunks(&mine.id).await.unwrap(), 0);
        assert!(store.list_documents("alice").await.unwrap().is_empty());
        assert_eq!(store.count_chunks(&theirs.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_cascades() {
        let store = memory_store().await;
        let doc = store.create_document(&new_doc("u1")).await.unwrap();
        let chunks = NewChunk::from_texts(vec!["alpha".into()], None);
        store
            .complete_document(&doc.id, &chunks, &[vec![1.0]])
            .await
            .unwrap();

        assert!(!store.delete_document("u2", &doc.id).await.unwrap());
        assert!(store.delete_document("u1", &doc.id).await.unwrap());
        assert_eq!(store.count_chunks(&doc.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn nearest_chunks_are_user_scoped() {
        let store = memory_store().await;
        let mine = store.create_document(&new_doc("alice")).await.unwrap();
        let theirs = store.create_document(&new_doc("bob")).await.unwrap();
        store
            .complete_document(
                &mine.id,
                &NewChunk::from_texts(vec!["close".into(), "far".into()], None),
                &[vec![0.9, 0.1], vec![0.0, 1.0]],
            )
            .await
            .unwrap();
        store
            .complete_document(
                &theirs.id,
                &NewChunk::from_texts(vec!["exact".into()], None),
                &[vec![1.0, 0.0]],
            )
            .await
            .unwrap();

        let hits = store.nearest_chunks("alice", &[1.0, 0.0], 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "close");
        assert!(hits.iter().all(|h| h.document_id == mine.id));
    }
}
