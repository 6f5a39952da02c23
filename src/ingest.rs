//! Upload ingestion pipeline.
//!
//! Drives one upload through the stages below, reporting progress through a
//! [`ProgressSender`]:
//!
//! ```text
//! validate ─▶ uploading (10) ─▶ extracting (25) ─▶ chunking (50)
//!          ─▶ embedding (65) ─▶ persisting (85) ─▶ done (100)
//! ```
//!
//! Validation failures return before anything is stored. Once the document
//! row exists, any failure marks it `failed` (best effort) and the original
//! error is surfaced as the stream's terminal event.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use docrag_core::chunk::Chunker;
use docrag_core::embedding::{embed_many, EmbedError, Embedder};
use docrag_core::file_type::{classify_with, FileCategory, ValidationError, DEFAULT_MAX_UPLOAD_BYTES};
use docrag_core::models::{Document, NewChunk, NewDocument};
use docrag_core::store::DocumentStore;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::blob::{blob_key, BlobStore};
use crate::extract::{extract_text_blocking, format_for, DocumentFormat, ExtractError};
use crate::progress::{IngestEvent, IngestResult, ProgressMode, ProgressReporter, ProgressSender};

const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_EVENT_BUFFER: usize = 16;

/// Pipeline stages after validation, with their progress percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Uploading,
    Extracting(FileCategory),
    Chunking,
    Embedding { chunks: usize },
    Persisting,
}

impl IngestStage {
    pub fn progress(&self) -> u8 {
        match self {
            IngestStage::Uploading => 10,
            IngestStage::Extracting(_) => 25,
            IngestStage::Chunking => 50,
            IngestStage::Embedding { .. } => 65,
            IngestStage::Persisting => 85,
        }
    }

    pub fn label(&self) -> String {
        match self {
            IngestStage::Uploading => "Uploading to storage...".to_string(),
            IngestStage::Extracting(category) => format!("Parsing {}...", category.label()),
            IngestStage::Chunking => "Splitting into chunks...".to_string(),
            IngestStage::Embedding { chunks } => {
                format!("Generating embeddings for {} chunks...", chunks)
            }
            IngestStage::Persisting => "Saving to database...".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to upload file: {0:#}")]
    Storage(anyhow::Error),

    #[error("Failed to create document record: {0:#}")]
    Database(anyhow::Error),

    #[error(transparent)]
    Extraction(#[from] ExtractError),

    #[error("No text content found in document")]
    EmptyContent,

    #[error("Failed to create content chunks")]
    NoChunks,

    #[error("Embedding count mismatch")]
    EmbeddingCountMismatch { expected: usize, actual: usize },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("Failed to generate embeddings: {0}")]
    Embedding(EmbedError),

    #[error("Failed to save document chunks: {0:#}")]
    Persist(anyhow::Error),

    #[error("Saving document chunks timed out after {0:?}")]
    PersistTimeout(Duration),
}

impl From<EmbedError> for IngestError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::CountMismatch { expected, actual } => {
                IngestError::EmbeddingCountMismatch { expected, actual }
            }
            other => IngestError::Embedding(other),
        }
    }
}

/// A file submitted by a user.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub user_id: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// The ingestion pipeline and its collaborators. Cheap to clone.
#[derive(Clone)]
pub struct IngestPipeline {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    max_bytes: usize,
    persist_timeout: Duration,
    event_buffer: usize,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            blobs,
            embedder,
            chunker: Chunker::default(),
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_persist_timeout(mut self, timeout: Duration) -> Self {
        self.persist_timeout = timeout;
        self
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer.max(1);
        self
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Check size, MIME type, extension, and magic bytes. Creates no state.
    ///
    /// The magic-byte check is the category's [`DocumentFormat`] handler.
    pub fn validate(&self, request: &UploadRequest) -> Result<FileCategory, ValidationError> {
        classify_with(
            &request.file_name,
            &request.mime_type,
            request.bytes.len(),
            &request.bytes,
            self.max_bytes,
            |category, bytes| format_for(category).validate_signature(bytes),
        )
    }

    /// Run a validated upload to completion on a background task and return
    /// its event stream. Dropping the receiver does not cancel the work.
    pub fn spawn(&self, request: UploadRequest, category: FileCategory) -> mpsc::Receiver<IngestEvent> {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let pipeline = self.clone();
        tokio::spawn(async move {
            let mut events = ProgressSender::new(tx);
            // The outcome is already reported on the stream and in the logs.
            let _ = pipeline.run(request, category, &mut events).await;
        });
        rx
    }

    /// Run a validated upload, emitting progress and exactly one terminal event.
    pub async fn run(
        &self,
        request: UploadRequest,
        category: FileCategory,
        events: &mut ProgressSender,
    ) -> Result<IngestResult, IngestError> {
        let outcome = self.process(request, category, events).await;
        match &outcome {
            Ok(result) => events.done(result.clone()).await,
            Err(err) => events.failed(err.to_string()).await,
        }
        outcome
    }

    async fn process(
        &self,
        request: UploadRequest,
        category: FileCategory,
        events: &mut ProgressSender,
    ) -> Result<IngestResult, IngestError> {
        let UploadRequest {
            user_id,
            file_name,
            bytes,
            ..
        } = request;

        step(events, IngestStage::Uploading).await;
        let key = blob_key(&user_id, &file_name);
        let file_url = self
            .blobs
            .put(&key, &bytes, category.mime_type())
            .await
            .map_err(|e| {
                error!(user_id = %user_id, file = %file_name, error = %e, "blob upload failed");
                IngestError::Storage(e)
            })?;

        let new_doc = NewDocument {
            user_id: user_id.clone(),
            file_name: file_name.clone(),
            file_type: category.mime_type().to_string(),
            file_size: bytes.len() as i64,
            file_path: file_url.clone(),
        };
        let document = match self.store.create_document(&new_doc).await {
            Ok(doc) => doc,
            Err(e) => {
                error!(user_id = %user_id, file = %file_name, error = %e, "failed to create document row");
                if let Err(cleanup) = self.blobs.delete(&file_url).await {
                    warn!(uri = %file_url, error = %cleanup, "failed to remove orphaned blob");
                }
                return Err(IngestError::Database(e));
            }
        };
        info!(document_id = %document.id, user_id = %user_id, file = %file_name, "document created");

        match self.process_document(&document, bytes, category, events).await {
            Ok(chunks_created) => {
                info!(document_id = %document.id, chunks = chunks_created, "document ingested");
                Ok(IngestResult {
                    success: true,
                    document_id: document.id,
                    chunks_created,
                    file_url,
                })
            }
            Err(err) => {
                error!(document_id = %document.id, error = %err, "ingestion failed");
                if let Err(e) = self.store.mark_failed(&document.id).await {
                    error!(document_id = %document.id, error = %e, "failed to mark document as failed");
                }
                Err(err)
            }
        }
    }

    /// Extract, chunk, embed, and persist. Returns the number of chunks stored.
    async fn process_document(
        &self,
        document: &Document,
        bytes: Vec<u8>,
        category: FileCategory,
        events: &mut ProgressSender,
    ) -> Result<usize, IngestError> {
        step(events, IngestStage::Extracting(category)).await;
        let extracted = extract_text_blocking(category, Arc::new(bytes)).await?;
        if extracted.text.trim().is_empty() {
            return Err(IngestError::EmptyContent);
        }
        debug!(document_id = %document.id, chars = extracted.text.len(), pages = ?extracted.pages, "text extracted");

        step(events, IngestStage::Chunking).await;
        let texts = self.chunker.chunk(&extracted.text);
        if texts.is_empty() {
            return Err(IngestError::NoChunks);
        }

        step(events, IngestStage::Embedding { chunks: texts.len() }).await;
        let vectors = embed_many(self.embedder.as_ref(), &texts).await?;
        let dims = self.embedder.dims();
        if dims > 0 {
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                return Err(IngestError::EmbeddingDimensionMismatch {
                    expected: dims,
                    actual: bad.len(),
                });
            }
        }

        step(events, IngestStage::Persisting).await;
        let chunks = NewChunk::from_texts(texts, Some(chunk_metadata(category, extracted.pages)));
        tokio::time::timeout(
            self.persist_timeout,
            self.store.complete_document(&document.id, &chunks, &vectors),
        )
        .await
        .map_err(|_| IngestError::PersistTimeout(self.persist_timeout))?
        .map_err(IngestError::Persist)
    }
}

/// CLI entry point for `docrag ingest`.
///
/// Files are processed one at a time. The declared type is taken from the
/// extension. Progress goes to stderr per `mode`; one summary line per file
/// goes to stdout. Fails if any file failed.
pub async fn run_ingest(
    pipeline: &IngestPipeline,
    user_id: &str,
    paths: &[impl AsRef<Path>],
    mode: ProgressMode,
) -> anyhow::Result<()> {
    let reporter = mode.reporter();
    let mut failures = 0usize;

    for path in paths {
        let path = path.as_ref();
        let display = path.display().to_string();
        match ingest_path(pipeline, user_id, path, reporter.as_ref()).await {
            Ok(result) => println!(
                "ok      {}  document={} chunks={}",
                display, result.document_id, result.chunks_created
            ),
            Err(e) => {
                failures += 1;
                println!("failed  {}  {:#}", display, e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} files failed to ingest", failures, paths.len());
    }
    Ok(())
}

async fn ingest_path(
    pipeline: &IngestPipeline,
    user_id: &str,
    path: &Path,
    reporter: &dyn ProgressReporter,
) -> anyhow::Result<IngestResult> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mime_type = FileCategory::from_file_name(&file_name)
        .map(|c| c.mime_type())
        .unwrap_or("application/octet-stream");
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;

    let request = UploadRequest {
        user_id: user_id.to_string(),
        file_name: file_name.clone(),
        mime_type: mime_type.to_string(),
        bytes,
    };
    let category = pipeline.validate(&request)?;

    let mut events = pipeline.spawn(request, category);
    while let Some(event) = events.recv().await {
        reporter.report(&file_name, &event);
        match event {
            IngestEvent::Done { result, .. } => return Ok(result),
            IngestEvent::Failed { error } => anyhow::bail!(error),
            IngestEvent::Progress { .. } => {}
        }
    }
    anyhow::bail!("ingestion of {} ended without a result", file_name)
}

async fn step(events: &mut ProgressSender, stage: IngestStage) {
    debug!(stage = ?stage, "ingest stage");
    events.progress(stage.progress(), stage.label()).await;
}

fn chunk_metadata(category: FileCategory, pages: Option<usize>) -> serde_json::Value {
    let mut meta = serde_json::json!({ "source": category.extension() });
    if let Some(pages) = pages {
        meta["pages"] = serde_json::json!(pages);
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::fixtures::{minimal_docx, minimal_pdf};
    use async_trait::async_trait;
    use docrag_core::file_type::{MIME_DOCX, MIME_PDF};
    use docrag_core::models::{DocumentChunk, DocumentStatus, SearchHit};
    use docrag_core::store::memory::InMemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryBlobs {
        objects: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobStore for MemoryBlobs {
        async fn put(&self, key: &str, _bytes: &[u8], _ct: &str) -> anyhow::Result<String> {
            self.objects.lock().unwrap().push(key.to_string());
            Ok(format!("mem://{key}"))
        }
        async fn delete(&self, uri: &str) -> anyhow::Result<()> {
            let key = uri.trim_start_matches("mem://");
            self.objects.lock().unwrap().retain(|k| k != key);
            Ok(())
        }
    }

    /// Returns `[len, 1.0]` per input, or drops the last vector when `short` is set.
    struct FakeEmbedder {
        short: bool,
        dims: usize,
    }

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn model_name(&self) -> &str {
            "fake"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            let mut out: Vec<Vec<f32>> = inputs.iter().map(|t| vec![t.len() as f32, 1.0]).collect();
            if self.short {
                out.pop();
            }
            Ok(out)
        }
    }

    /// Wraps [`InMemoryStore`] with a slow `complete_document` or a broken
    /// `mark_failed`.
    #[derive(Default)]
    struct ScriptedStore {
        inner: InMemoryStore,
        persist_delay: Option<Duration>,
        fail_mark: bool,
    }

    #[async_trait]
    impl DocumentStore for ScriptedStore {
        async fn create_document(&self, doc: &NewDocument) -> anyhow::Result<Document> {
            self.inner.create_document(doc).await
        }
        async fn complete_document(
            &self,
            document_id: &str,
            chunks: &[NewChunk],
            vectors: &[Vec<f32>],
        ) -> anyhow::Result<usize> {
            if let Some(delay) = self.persist_delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.complete_document(document_id, chunks, vectors).await
        }
        async fn mark_failed(&self, document_id: &str) -> anyhow::Result<bool> {
            if self.fail_mark {
                anyhow::bail!("database is locked");
            }
            self.inner.mark_failed(document_id).await
        }
        async fn get_document(&self, user_id: &str, document_id: &str) -> anyhow::Result<Option<Document>> {
            self.inner.get_document(user_id, document_id).await
        }
        async fn list_documents(&self, user_id: &str) -> anyhow::Result<Vec<Document>> {
            self.inner.list_documents(user_id).await
        }
        async fn list_chunks(&self, document_id: &str) -> anyhow::Result<Vec<DocumentChunk>> {
            self.inner.list_chunks(document_id).await
        }
        async fn delete_document(&self, user_id: &str, document_id: &str) -> anyhow::Result<bool> {
            self.inner.delete_document(user_id, document_id).await
        }
        async fn delete_user_documents(&self, user_id: &str) -> anyhow::Result<u64> {
            self.inner.delete_user_documents(user_id).await
        }
        async fn nearest_chunks(
            &self,
            user_id: &str,
            query: &[f32],
            limit: usize,
        ) -> anyhow::Result<Vec<SearchHit>> {
            self.inner.nearest_chunks(user_id, query, limit).await
        }
    }

    fn pipeline(store: Arc<InMemoryStore>, embedder: FakeEmbedder) -> IngestPipeline {
        IngestPipeline::new(store, Arc::new(MemoryBlobs::default()), Arc::new(embedder))
    }

    fn good_embedder() -> FakeEmbedder {
        FakeEmbedder { short: false, dims: 2 }
    }

    fn upload(name: &str, mime: &str, bytes: Vec<u8>) -> UploadRequest {
        UploadRequest {
            user_id: "user-1".into(),
            file_name: name.into(),
            mime_type: mime.into(),
            bytes,
        }
    }

    async fn collect(mut rx: mpsc::Receiver<IngestEvent>) -> Vec<IngestEvent> {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn pdf_upload_completes_with_ordered_progress() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone(), good_embedder());
        let request = upload("report.pdf", MIME_PDF, minimal_pdf("The quick brown fox"));

        let category = pipeline.validate(&request).unwrap();
        let events = collect(pipeline.spawn(request, category)).await;

        let progress: Vec<u8> = events.iter().filter_map(|e| e.progress()).collect();
        assert_eq!(progress, vec![10, 25, 50, 65, 85, 100]);
        assert!(matches!(&events[1], IngestEvent::Progress { label, .. } if label == "Parsing PDF..."));
        assert!(matches!(&events[3], IngestEvent::Progress { label, .. } if label == "Generating embeddings for 1 chunks..."));

        let result = match events.last().unwrap() {
            IngestEvent::Done { result, .. } => result.clone(),
            other => panic!("expected done, got {other:?}"),
        };
        assert!(result.success);
        assert_eq!(result.chunks_created, 1);
        assert!(result.file_url.starts_with("mem://user-1/"));

        let doc = store
            .get_document("user-1", &result.document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.file_type, MIME_PDF);

        let chunks = store.list_chunks(&doc.id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert!(chunks[0].content.contains("quick brown fox"));
        assert!(chunks[0].embedding.is_some());
        assert_eq!(chunks[0].metadata.as_ref().unwrap()["pages"], 1);
    }

    #[tokio::test]
    async fn blank_document_fails_and_marks_row() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone(), good_embedder());
        let request = upload("blank.docx", MIME_DOCX, minimal_docx("<w:p><w:r><w:t> </w:t></w:r></w:p>"));

        let category = pipeline.validate(&request).unwrap();
        let mut events = ProgressSender::discard();
        let err = pipeline.run(request, category, &mut events).await.unwrap_err();
        assert!(matches!(err, IngestError::EmptyContent));
        assert!(err.to_string().contains("No text content found"));
        assert!(events.is_finished());

        let docs = store.list_documents("user-1").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].status, DocumentStatus::Failed);
        assert!(store.list_chunks(&docs[0].id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn embedding_count_mismatch_is_fatal() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone(), FakeEmbedder { short: true, dims: 2 });
        let request = upload("a.pdf", MIME_PDF, minimal_pdf("some words here"));

        let category = pipeline.validate(&request).unwrap();
        let events = collect(pipeline.spawn(request, category)).await;
        assert!(matches!(events.last(), Some(IngestEvent::Failed { error }) if error == "Embedding count mismatch"));

        let docs = store.list_documents("user-1").await.unwrap();
        assert_eq!(docs[0].status, DocumentStatus::Failed);
    }

    #[tokio::test]
    async fn wrong_dimensions_are_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone(), FakeEmbedder { short: false, dims: 1536 });
        let request = upload("a.pdf", MIME_PDF, minimal_pdf("some words here"));

        let category = pipeline.validate(&request).unwrap();
        let mut events = ProgressSender::discard();
        let err = pipeline.run(request, category, &mut events).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::EmbeddingDimensionMismatch { expected: 1536, actual: 2 }
        ));
    }

    #[tokio::test]
    async fn validation_rejects_before_any_state() {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = pipeline(store.clone(), good_embedder());

        let fake = upload("fake.pdf", MIME_PDF, b"hello world".to_vec());
        let err = pipeline.validate(&fake).unwrap_err();
        assert_eq!(err.to_string(), "Invalid file format");

        let big = upload("big.pdf", MIME_PDF, vec![b'%'; 11 * 1024 * 1024]);
        assert_eq!(pipeline.validate(&big).unwrap_err().status_code(), 413);

        assert!(store.list_documents("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn slow_persist_times_out_and_marks_failed() {
        let store = Arc::new(ScriptedStore {
            persist_delay: Some(Duration::from_millis(500)),
            ..Default::default()
        });
        let pipeline = IngestPipeline::new(
            store.clone(),
            Arc::new(MemoryBlobs::default()),
            Arc::new(good_embedder()),
        )
        .with_persist_timeout(Duration::from_millis(50));
        let request = upload("slow.pdf", MIME_PDF, minimal_pdf("some words here"));

        let category = pipeline.validate(&request).unwrap();
        let events = collect(pipeline.spawn(request, category)).await;
        match events.last() {
            Some(IngestEvent::Failed { error }) => assert!(error.contains("timed out"), "{error}"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(events.iter().filter_map(|e| e.progress()).last(), Some(85));

        let docs = store.list_documents("user-1").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].status, DocumentStatus::Failed);
        assert!(store.list_chunks(&docs[0].id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_failed_error_keeps_original_error() {
        let store = Arc::new(ScriptedStore {
            fail_mark: true,
            ..Default::default()
        });
        let pipeline = IngestPipeline::new(
            store.clone(),
            Arc::new(MemoryBlobs::default()),
            Arc::new(good_embedder()),
        );
        let request = upload("blank.docx", MIME_DOCX, minimal_docx("<w:p><w:r><w:t> </w:t></w:r></w:p>"));

        let category = pipeline.validate(&request).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let mut events = ProgressSender::new(tx);
        let err = pipeline.run(request, category, &mut events).await.unwrap_err();
        assert!(matches!(err, IngestError::EmptyContent));
        drop(events);

        let mut last = None;
        while let Some(ev) = rx.recv().await {
            last = Some(ev);
        }
        assert!(matches!(last, Some(IngestEvent::Failed { error }) if error == "No text content found in document"));

        // The status update failed, so the row is still processing.
        let docs = store.list_documents("user-1").await.unwrap();
        assert_eq!(docs[0].status, DocumentStatus::Processing);
    }

    #[test]
    fn stage_labels() {
        assert_eq!(IngestStage::Uploading.label(), "Uploading to storage...");
        assert_eq!(IngestStage::Extracting(FileCategory::Doc).label(), "Parsing DOC...");
        assert_eq!(IngestStage::Chunking.progress(), 50);
        assert_eq!(IngestStage::Persisting.label(), "Saving to database...");
    }
}
