//! # rag-ingest
//!
//! Document ingestion for retrieval-augmented generation: turns uploaded
//! project files into embedded, retrievable text chunks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────┐   ┌───────┐   ┌────────┐   ┌─────────┐   ┌─────────────┐
//! │ Object store │──▶│ Extract │──▶│ Chunk │──▶│ Enrich │──▶│  Embed  │──▶│ Chunk store │
//! │  (raw bytes) │   │ txt/md/ │   │ 512 / │   │ tables │   │ batched │   │  (SQLite)   │
//! └──────────────┘   │ pdf/xml │   │ 100   │   └────────┘   └─────────┘   └─────────────┘
//!                    └─────────┘   └───────┘
//!        pending ──▶ processing ──▶ completed | failed      (file status, SQLite)
//! ```
//!
//! The [`pipeline::Pipeline`] runs one file and owns its status
//! transitions; [`batch::BatchRunner`] and [`queue::IngestQueue`] drive it
//! over many files, one at a time.
//!
//! ## Quick Start
//!
//! ```bash
//! ingest init
//! ingest files add ./docs --project acme
//! ingest process --project acme
//! ingest stats --project acme
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | File records, chunks, results |
//! | [`error`] | Pipeline error taxonomy |
//! | [`object_store`] | Raw file storage boundary |
//! | [`extract`] | Plain text, markdown, PDF, and XML extraction |
//! | [`chunk`] | Overlapping token-window chunking |
//! | [`enrich`] | Table enrichment with synthetic sentences |
//! | [`embedding`] | Embedding service providers |
//! | [`embedder`] | Batched embedding with timeouts and progress |
//! | [`store`] | File status and chunk persistence |
//! | [`pipeline`] | Orchestrator and reprocessor |
//! | [`batch`] | Sequential batch runner |
//! | [`queue`] | Background ingestion queue |
//! | [`stats`] | Per-project statistics |
//! | [`files`] | File registration and admin reset |
//! | [`progress`] | Progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod batch;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedder;
pub mod embedding;
pub mod enrich;
pub mod error;
pub mod extract;
pub mod files;
pub mod migrate;
pub mod models;
pub mod object_store;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod stats;
pub mod store;
