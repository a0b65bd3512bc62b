//! Context Orchestrator — a personal "external brain" for CLI assistants
//! and editor plug-ins, speaking MCP over stdio.
//!
//! Conversations are classified into one of four schemas (Incident,
//! Snippet, Decision, Process), summarised into a strict structured form,
//! chunked, embedded, and dual-indexed: dense vectors via sqlite-vec and
//! BM25 via FTS5. Retrieval runs both indexes in parallel, merges, applies
//! a rule-based rerank, and optionally a cross-encoder rerank backed by a
//! three-level cache (exact / keyword / semantic). A nightly consolidation
//! pass migrates memories through Working → ShortTerm → LongTerm tiers,
//! clusters near-duplicates behind a representative, and forgets the old
//! and unimportant.
//!
//! # Modules
//!
//! - [`config`] — TOML configuration with env overrides
//! - [`db`] — SQLite initialization, schema, and migrations
//! - [`storage`] — vector store and lexical index adapters
//! - [`embedding`] — local ONNX embedding pipeline
//! - [`model`] — local/external reasoners and task routing
//! - [`memory`] — ingestion, retrieval, reranking, sessions, consolidation
//! - [`tools`] — the MCP tool surface
//! - [`server`] — assembly and the stdio entry point

pub mod cli;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod model;
pub mod server;
pub mod storage;
pub mod tools;
