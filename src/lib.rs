//! # RAG Code Assistant
//!
//! Retrieval-augmented question answering over a local source tree.
//!
//! A directory is scanned, each admissible file is hashed and split into
//! overlapping chunks, and every chunk is embedded and stored in a SQLite
//! index. Questions pass a security gate, retrieve the closest chunks by
//! cosine similarity, and are answered by a language model with the
//! session's recent conversation as context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────────┐   ┌──────────┐
//! │ Scanner  │──▶│ Security │──▶│ Chunk+Embed │──▶│  SQLite  │
//! │ walkdir  │   │   gate   │   │             │   │  index   │
//! └──────────┘   └──────────┘   └─────────────┘   └────┬─────┘
//!                                                      │
//!                       ┌──────────────────────────────┤
//!                       ▼                              ▼
//!                 ┌───────────┐   ┌────────┐     ┌──────────┐
//!                 │ Assistant │──▶│  LLM   │     │  search  │
//!                 │ + memory  │   └────────┘     └──────────┘
//!                 └─────┬─────┘
//!                 ┌─────┴─────┐
//!                 ▼           ▼
//!            ┌────────┐  ┌────────┐
//!            │  CLI   │  │  HTTP  │
//!            │ (rca)  │  │ (axum) │
//!            └────────┘  └────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rca init                         # create the index
//! rca ingest ~/src/my-project      # embed a codebase
//! rca ask "where is the config parsed?"
//! rca serve                        # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`scanner`] | Directory walking and file reading |
//! | [`security`] | Query, path, and content validation; rate limiting |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Language-model adapters |
//! | [`store`] | Persistent vector index |
//! | [`memory`] | Per-session conversation history |
//! | [`assistant`] | Retrieval-augmented answering |
//! | [`app`] | Application facade |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod assistant;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod scanner;
pub mod security;
pub mod server;
pub mod store;
