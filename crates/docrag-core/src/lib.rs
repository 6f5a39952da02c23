//! # docrag core
//!
//! Runtime-agnostic logic shared by the docrag application: data models,
//! upload classification, chunking, the embedding trait and vector math,
//! the store abstraction, and the similarity search algorithm.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Concrete
//! backends (SQLite, OpenAI, blob storage) live in the `docrag` app crate.

pub mod chunk;
pub mod embedding;
pub mod file_type;
pub mod models;
pub mod search;
pub mod store;
