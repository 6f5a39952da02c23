//! # docrag
//!
//! Document ingestion and retrieval for a RAG chat application.
//!
//! Users upload PDF, DOCX, or legacy DOC files. Each upload is validated,
//! stored, parsed to plain text, split into overlapping chunks, embedded,
//! and persisted. Retrieval embeds a query and returns the user's most
//! similar chunks above a similarity threshold.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────────┐   ┌──────────┐
//! │  Upload  │──▶│ IngestPipeline               │──▶│  SQLite  │
//! │ HTTP/CLI │   │ blob, extract, chunk, embed  │   │ + blobs  │
//! └──────────┘   └──────────────┬───────────────┘   └────┬─────┘
//!                               │ progress events         │
//!                               ▼                         ▼
//!                          SSE / stderr          semantic_search
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docrag init                               # create database
//! docrag ingest report.pdf --user alice     # ingest a file
//! docrag search "quarterly revenue" --user alice
//! docrag serve                              # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite document store |
//! | [`extract`] | PDF, DOCX, and DOC text extraction |
//! | [`embedding`] | Embedding providers |
//! | [`blob`] | Raw upload storage |
//! | [`progress`] | Ingestion progress events |
//! | [`ingest`] | Ingestion pipeline |
//! | [`documents`] | Document listing and deletion |
//! | [`search`] | Search tool and CLI |
//! | [`app`] | Process-wide clients |
//! | [`server`] | HTTP API |
//!
//! Runtime-agnostic pieces (models, chunking, classification, ranking) live
//! in the [`docrag_core`] crate.

pub mod app;
pub mod blob;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod progress;
pub mod search;
pub mod server;
pub mod sqlite_store;
