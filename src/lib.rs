//! dossier: an async ingestion and search pipeline for client documents.
//!
//! Documents are chunked, distilled into search terms by a chat model,
//! embedded, and stored in SQLite alongside their source rows. A signal-
//! driven worker pool with bounded concurrency and dual-window rate
//! limiting drives the pipeline; a maintenance scheduler recovers stuck
//! and retryable work. Search comes in two shapes: fuzzy client lookup
//! and per-client vector search over embedded terms.

pub mod config;
pub mod db;
pub mod embed_worker;
pub mod error;
pub mod events;
pub mod ingest;
pub mod limiter;
pub mod maintenance;
pub mod migrate;
pub mod models;
pub mod provider;
pub mod search;
pub mod splitter;
pub mod store_chunks;
pub mod store_clients;
pub mod store_documents;
pub mod summary_worker;
