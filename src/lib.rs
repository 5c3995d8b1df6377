//! # Knowledge Harness
//!
//! Keeps a relational record store and a vector index of document
//! embeddings in sync with an external document source, and answers
//! semantic queries over that index with per-principal access filtering.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │    Source    │──▶│ Sync Engine  │──▶│ Record Store │
//! │  (fs, ...)   │   │ full / incr. │   │   (SQLite)   │
//! └──────────────┘   └──────┬───────┘   └──────┬───────┘
//!                           ▼                  │ hydrate
//!                    ┌──────────────┐   ┌──────┴───────┐
//!                    │  Embedding   │──▶│ Vector Index │
//!                    │   Pipeline   │   │ sqlite/mem/  │
//!                    └──────────────┘   │    qdrant    │
//!                                       └──────────────┘
//!          every quota-limited call ──▶ Adaptive Cooldown
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kh init                       # create database
//! kh containers                 # what the source offers
//! kh import ENG OPS             # full import of two containers
//! kh update                     # incremental sync of everything imported
//! kh query "how do I restart the ingest worker?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`records`] | Container and document persistence |
//! | [`cooldown`] | Shared adaptive rate-limit backoff |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector`] | Vector index abstraction and backends |
//! | [`pipeline`] | Chunked, throttled embedding pipeline |
//! | [`knowledge`] | Two-store writes and access-filtered retrieval |
//! | [`access`] | Access policies |
//! | [`source`] | Document source capability and filesystem source |
//! | [`sync`] | Full import and incremental sync |
//! | [`stats`] | Store statistics |
//! | [`app`] | Wiring from configuration |

pub mod access;
pub mod app;
pub mod config;
pub mod cooldown;
pub mod db;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod records;
pub mod source;
pub mod stats;
pub mod sync;
pub mod vector;

#[cfg(test)]
mod testing;
