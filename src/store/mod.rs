//! Storage abstraction for the knowledge index.
//!
//! The [`Store`] trait covers everything ingestion and querying need from
//! the index. Two backends implement it with the same ranking contract:
//!
//! | Backend | Module | Use |
//! |---------|--------|-----|
//! | [`SqliteStore`] | [`sqlite`] | durable store file, SQLite FTS5 |
//! | [`InMemoryStore`] | [`memory`] | tests and embedding, no file |
//!
//! # Ranking contract
//!
//! Query text is split by [`crate::tokenize`] and every term must occur in
//! the title or content (implicit AND). Hits are ranked by BM25 with
//! `k1 = 1.2`, `b = 0.75`, computed over title and content together, and
//! the score is negated so that **lower is better**. Results come back in
//! ascending score order; equal scores keep insertion order.
//!
//! Snippets are drawn from `content`: a window of `snippet_tokens` tokens
//! around the first match, matches wrapped in `<b>`/`</b>`, and
//! [`ELLIPSIS`] at a truncated boundary.

pub mod memory;
pub mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Document, SearchResult};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Marker placed where a snippet was cut short.
pub const ELLIPSIS: &str = "\u{2026}";

/// Default snippet window, in tokens.
pub const DEFAULT_SNIPPET_TOKENS: usize = 12;

/// Largest window SQLite's `snippet()` accepts.
pub const MAX_SNIPPET_TOKENS: usize = 64;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to prepare store location: {0}")]
    Io(#[from] std::io::Error),

    #[error("duplicate document path: {0}")]
    DuplicatePath(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Abstract index backend.
///
/// Implementations must let a [`rebuild`](Store::rebuild) run while other
/// tasks call [`search`](Store::search) or [`get`](Store::get): readers
/// see either the complete previous index or the complete new one.
#[async_trait]
pub trait Store: Send + Sync {
    /// Replaces the whole index with `documents`.
    ///
    /// Fails with [`StoreError::DuplicatePath`] if two documents share a
    /// path; the previous index is left untouched in that case.
    async fn rebuild(&self, documents: &[Document]) -> Result<(), StoreError>;

    /// Ranked keyword search. A `limit` of zero or less returns every hit.
    async fn search(&self, query: &str, limit: i64) -> Result<Vec<SearchResult>, StoreError>;

    /// Exact path lookup.
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError>;

    /// Number of indexed documents.
    async fn count(&self) -> Result<i64, StoreError>;
}

/// Rejects a document set that repeats a path.
pub fn ensure_unique_paths(documents: &[Document]) -> Result<(), StoreError> {
    let mut seen = HashSet::with_capacity(documents.len());
    for doc in documents {
        if !seen.insert(doc.path.as_str()) {
            return Err(StoreError::DuplicatePath(doc.path.clone()));
        }
    }
    Ok(())
}

fn clamp_snippet_tokens(tokens: usize) -> usize {
    tokens.clamp(1, MAX_SNIPPET_TOKENS)
}
