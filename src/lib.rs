//! # Knowledge Harness
//!
//! A local document knowledge base: extracts text from office documents,
//! PDFs, Markdown and plain text, keeps it in a full-text index, and answers
//! ranked keyword searches and exact document lookups.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────────┐   ┌───────────┐
//! │  Source  │──▶│ Extract+Normalize  │──▶│  SQLite   │
//! │  roots   │   │ pdf/docx/xlsx/md/… │   │   FTS5    │
//! └──────────┘   └────────────────────┘   └─────┬─────┘
//!                                               │
//!                          ┌────────────────────┤
//!                          ▼                    ▼
//!                     ┌──────────┐        ┌───────────┐
//!                     │   CLI    │        │ Dispatch  │
//!                     │  (kbh)   │        │ (stdio)   │
//!                     └──────────┘        └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbh init                                  # create the store
//! kbh ingest --src ./sources/ledningssystem # full rebuild
//! kbh search "hjärtsvikt behandling"
//! kbh serve                                 # JSON requests on stdin
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`scan`] | Source file discovery |
//! | [`extract`] | Per-format text extraction |
//! | [`normalize`] | Whitespace canonicalization |
//! | [`tokenize`] | Term splitting shared by index and query |
//! | [`store`] | Index backends (SQLite FTS5, in-memory) |
//! | [`ingest`] | Full-rebuild ingestion pipeline |
//! | [`query`] | Search and retrieval envelopes |
//! | [`dispatch`] | JSON request dispatch |
//! | [`db`] | Database connection |

pub mod config;
pub mod db;
pub mod dispatch;
pub mod extract;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod query;
pub mod scan;
pub mod store;
pub mod tokenize;
