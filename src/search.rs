//! Search surfaces over [`docrag_core::search::semantic_search`].
//!
//! - [`SearchDocumentsTool`]: the `search_documents` chat tool. Never fails;
//!   search errors degrade to a "nothing found" answer.
//! - [`run_search`]: the `docrag search` CLI command.

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use docrag_core::embedding::Embedder;
use docrag_core::models::SearchHit;
use docrag_core::search::{semantic_search, SearchOptions};
use docrag_core::store::DocumentStore;

use crate::config::RetrievalConfig;

pub const NO_RESULTS_MESSAGE: &str = "No relevant information found in the uploaded documents.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolParams {
    query: String,
    limit: Option<usize>,
    min_score: Option<f64>,
}

/// Semantic search exposed to a chat model as a function-calling tool.
#[derive(Clone)]
pub struct SearchDocumentsTool {
    store: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    retrieval: RetrievalConfig,
}

impl SearchDocumentsTool {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            retrieval,
        }
    }

    pub fn name(&self) -> &str {
        "search_documents"
    }

    pub fn description(&self) -> &str {
        "Search the user's uploaded documents for passages relevant to a question"
    }

    /// OpenAI function-calling JSON Schema for the tool's parameters.
    pub fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for in the documents"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of passages",
                    "default": self.retrieval.limit
                },
                "minScore": {
                    "type": "number",
                    "description": "Minimum similarity between 0 and 1",
                    "default": self.retrieval.min_score
                }
            },
            "required": ["query"]
        })
    }

    fn options(&self, user_id: &str, query: &str, limit: Option<usize>, min_score: Option<f64>) -> SearchOptions {
        SearchOptions::new(query, user_id)
            .with_limit(limit.unwrap_or(self.retrieval.limit))
            .with_min_score(min_score.unwrap_or(self.retrieval.min_score))
    }

    /// Structured search. Errors are logged and reported as no hits.
    pub async fn search(&self, opts: &SearchOptions) -> Vec<SearchHit> {
        match semantic_search(self.store.as_ref(), self.embedder.as_ref(), opts).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(user_id = %opts.user_id, error = %e, "document search failed");
                Vec::new()
            }
        }
    }

    /// Run the tool for `user_id` and return the text handed back to the model.
    pub async fn execute(&self, user_id: &str, params: Value) -> String {
        let params: ToolParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "invalid search_documents parameters");
                return NO_RESULTS_MESSAGE.to_string();
            }
        };
        let opts = self.options(user_id, &params.query, params.limit, params.min_score);
        format_hits(&self.search(&opts).await)
    }
}

/// Render hits as numbered passages for a chat model.
pub fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return NO_RESULTS_MESSAGE.to_string();
    }
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "[{}] (document {}, similarity {:.2})\n{}",
                i + 1,
                hit.document_id,
                hit.similarity,
                hit.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// CLI entry point for `docrag search`. Unlike the tool, errors propagate.
pub async fn run_search(
    store: &dyn DocumentStore,
    embedder: &dyn Embedder,
    opts: &SearchOptions,
    json_output: bool,
) -> Result<()> {
    let hits = semantic_search(store, embedder, opts).await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] document: {} chunk: {}",
            i + 1,
            hit.similarity,
            hit.document_id,
            hit.id
        );
        println!("    {}", snippet(&hit.content, 200));
        println!();
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docrag_core::embedding::EmbedError;
    use docrag_core::models::{NewChunk, NewDocument};
    use docrag_core::store::memory::InMemoryStore;

    /// Maps "apples" to x and everything else to y.
    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Ok(inputs
                .iter()
                .map(|t| if t.contains("apples") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::Service("connection refused".into()))
        }
    }

    async fn store_with_fruit() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let doc = store
            .create_document(&NewDocument {
                user_id: "u1".into(),
                file_name: "fruit.pdf".into(),
                file_type: "application/pdf".into(),
                file_size: 1,
                file_path: "mem://fruit.pdf".into(),
            })
            .await
            .unwrap();
        store
            .complete_document(
                &doc.id,
                &NewChunk::from_texts(vec!["apples are red".into(), "bananas".into()], None),
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn tool_returns_matching_passages() {
        let tool = SearchDocumentsTool::new(
            store_with_fruit().await,
            Arc::new(AxisEmbedder),
            RetrievalConfig::default(),
        );
        let answer = tool.execute("u1", json!({"query": "apples"})).await;
        assert!(answer.starts_with("[1]"));
        assert!(answer.contains("apples are red"));
        assert!(!answer.contains("bananas"));
    }

    #[tokio::test]
    async fn tool_degrades_on_errors() {
        let tool = SearchDocumentsTool::new(
            store_with_fruit().await,
            Arc::new(BrokenEmbedder),
            RetrievalConfig::default(),
        );
        assert_eq!(tool.execute("u1", json!({"query": "apples"})).await, NO_RESULTS_MESSAGE);
        assert_eq!(tool.execute("u1", json!({"limit": 3})).await, NO_RESULTS_MESSAGE);
    }

    #[tokio::test]
    async fn tool_is_scoped_to_the_caller() {
        let tool = SearchDocumentsTool::new(
            store_with_fruit().await,
            Arc::new(AxisEmbedder),
            RetrievalConfig::default(),
        );
        assert_eq!(tool.execute("u2", json!({"query": "apples"})).await, NO_RESULTS_MESSAGE);
    }

    #[test]
    fn schema_requires_query() {
        let tool = SearchDocumentsTool::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(AxisEmbedder),
            RetrievalConfig::default(),
        );
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], json!(["query"]));
        assert_eq!(schema["properties"]["limit"]["default"], 5);
    }

    #[test]
    fn snippet_truncates_on_char_boundary() {
        assert_eq!(snippet("héllo\nworld", 3), "hél...");
        assert_eq!(snippet("short", 10), "short");
    }
}
