//! # Appliance Pilot
//!
//! A knowledge pipeline that turns kitchen-appliance manuals into
//! structured, searchable appliance profiles for recipe adaptation.
//!
//! Manuals arrive as uploaded files, URLs, or pre-extracted text. The
//! pipeline normalizes them to text (local PDF parsing first, vision-model
//! OCR as the paid fallback), chunks and embeds the text into a vector
//! index, extracts structured specs, and exposes the result over HTTP.
//! A completed appliance can then tailor any recipe's steps to its own
//! modes and settings via retrieval-augmented generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌───────────┐
//! │ Manual       │──▶│  Ingestion     │──▶│  SQLite    │
//! │ file/URL/text│   │ resolve→chunk  │   │ rows + vec │
//! └──────────────┘   │ →embed→specs  │   └─────┬─────┘
//!                    └───────────────┘         │
//!                                              ▼
//!                                       ┌────────────┐
//!                                       │ Adaptation │
//!                                       │ (RAG over  │
//!                                       │  manual)   │
//!                                       └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`resolver`] | Manual source resolution and text extraction |
//! | [`extract`] | Local document parsing |
//! | [`chunker`] | Overlapping text chunking |
//! | [`indexer`] | Chunk embedding and vector writes |
//! | [`vector`] | SQLite-backed vector index |
//! | [`specs`] | Structured spec extraction |
//! | [`ingest`] | Ingestion stage coordination |
//! | [`jobs`] | Bounded ingestion worker pool |
//! | [`adapt`] | Recipe adaptation engine |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod adapt;
pub mod chunker;
pub mod config;
pub mod db;
pub mod extract;
pub mod indexer;
pub mod ingest;
pub mod jobs;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod object_store;
pub mod resolver;
pub mod server;
pub mod specs;
pub mod store;
pub mod vector;
