//! # mailvec
//!
//! An owner-partitioned mailbox ingestion and semantic retrieval pipeline.
//!
//! mailvec incrementally syncs a user's mailbox into a vector index:
//! messages are listed and fetched through a retrying mail API client,
//! parsed out of their MIME transport format, cleaned into canonical
//! documents, embedded, and upserted into an owner-partitioned collection.
//! A per-owner cursor bounds each run to mail newer than the last sync.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────────┐   ┌─────────────┐
//! │  Mail API    │──▶│      SyncEngine       │──▶│   Qdrant    │
//! │ list / fetch │   │ parse → clean → embed │   │ per owner   │
//! └──────────────┘   └──────────┬────────────┘   └──────┬──────┘
//!        ▲                      │                       │
//!        │                ┌─────▼─────┐           ┌─────▼─────┐
//!   Backoff retry         │  SQLite   │           │  search   │
//!                         │  cursors  │           │ (per owner)│
//!                         └───────────┘           └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`backoff`] | Bounded exponential-backoff retry |
//! | [`mail`] | Mail API transport, pagination, MIME parsing |
//! | [`clean`] | Record cleaning |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_store`] | Owner-partitioned vector storage |
//! | [`sync`] | Sync orchestration and cursor persistence |
//! | [`search`] | Owner-scoped semantic search |
//! | [`db`] | SQLite connection and schema |

pub mod backoff;
pub mod clean;
pub mod config;
pub mod db;
pub mod embedding;
pub mod mail;
pub mod models;
pub mod search;
pub mod sync;
pub mod vector_store;
