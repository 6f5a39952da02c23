//! Process-wide clients, built once at startup.
//!
//! [`AppContext`] owns the database pool, the store, blob storage, the
//! embedding client, the ingestion pipeline, and the search tool. The CLI and
//! the HTTP server both start from here; tests can assemble the parts
//! directly with fresh instances instead.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

use docrag_core::chunk::Chunker;
use docrag_core::embedding::Embedder;
use docrag_core::search::SearchOptions;
use docrag_core::store::DocumentStore;

use crate::blob::{BlobStore, FsBlobStore};
use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::ingest::IngestPipeline;
use crate::migrate::migrate_pool;
use crate::search::SearchDocumentsTool;
use crate::sqlite_store::SqliteStore;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub store: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub embedder: Arc<dyn Embedder>,
    pub pipeline: IngestPipeline,
    pub search_tool: SearchDocumentsTool,
}

impl AppContext {
    /// Connect to the database, apply migrations, and build every client.
    pub async fn init(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate_pool(&pool).await?;

        let embedder = create_embedder(&config.embedding)
            .context("Failed to configure embedding provider")?;
        let root = std::path::absolute(&config.storage.root).with_context(|| {
            format!("Invalid storage root: {}", config.storage.root.display())
        })?;
        let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(
            root,
            config.storage.public_base_url.clone(),
        ));

        let ctx = Self::from_parts(config, pool, blobs, embedder);
        info!(
            db = %config.db.path.display(),
            embedding = ctx.embedder.model_name(),
            "application context ready"
        );
        Ok(ctx)
    }

    /// Assemble a context around an existing pool and clients.
    pub fn from_parts(
        config: &Config,
        pool: SqlitePool,
        blobs: Arc<dyn BlobStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::new(pool.clone()));
        let pipeline = IngestPipeline::new(store.clone(), blobs.clone(), embedder.clone())
            .with_chunker(Chunker::new(
                config.chunking.chunk_size,
                config.chunking.chunk_overlap,
            ))
            .with_max_bytes(config.upload.max_bytes)
            .with_persist_timeout(config.upload.persist_timeout())
            .with_event_buffer(config.upload.event_buffer);
        let search_tool =
            SearchDocumentsTool::new(store.clone(), embedder.clone(), config.retrieval.clone());

        Self {
            config: Arc::new(config.clone()),
            pool,
            store,
            blobs,
            embedder,
            pipeline,
            search_tool,
        }
    }

    /// Search options for `user_id` with the configured defaults applied.
    pub fn search_options(
        &self,
        user_id: &str,
        query: &str,
        limit: Option<usize>,
        min_score: Option<f64>,
    ) -> SearchOptions {
        SearchOptions::new(query, user_id)
            .with_limit(limit.unwrap_or(self.config.retrieval.limit))
            .with_min_score(min_score.unwrap_or(self.config.retrieval.min_score))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
