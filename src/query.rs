//! Query engine: ranked search and exact retrieval over an index.
//!
//! Both operations return a [`Response`] envelope instead of an error, so
//! callers across a process boundary always receive a well-formed object:
//!
//! ```json
//! {"success": true,  "data": [...]}
//! {"success": false, "error": "database error: ..."}
//! ```
//!
//! A path that is not in the index is a successful lookup with
//! `"data": null`.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::warn;

use crate::config::Config;
use crate::models::{Document, SearchResult};
use crate::store::{SqliteStore, Store, StoreError};

/// Success-or-failure envelope returned by every query operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Response<T> {
    Success(T),
    Failure(String),
}

impl<T> Response<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success(_))
    }

    pub fn into_result(self) -> std::result::Result<T, String> {
        match self {
            Response::Success(data) => Ok(data),
            Response::Failure(error) => Err(error),
        }
    }
}

impl<T: Serialize> Serialize for Response<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            Response::Success(data) => {
                map.serialize_entry("success", &true)?;
                map.serialize_entry("data", data)?;
            }
            Response::Failure(error) => {
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", error)?;
            }
        }
        map.end()
    }
}

pub struct QueryEngine {
    store: Arc<dyn Store>,
    default_limit: i64,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn Store>, default_limit: i64) -> Self {
        Self {
            store,
            default_limit,
        }
    }

    /// Opens the SQLite store named in `config`. The store must already
    /// exist; queries never create it.
    pub async fn open(config: &Config) -> Result<Self> {
        let store = SqliteStore::open_existing(&config.db.path)
            .await
            .with_context(|| format!("Failed to open store: {}", config.db.path.display()))?
            .with_snippet_tokens(config.retrieval.snippet_tokens);
        Ok(Self::new(Arc::new(store), config.retrieval.default_limit))
    }

    /// Like [`open`](Self::open), but a store that cannot be opened yields
    /// an engine whose every query answers `success: false` with the reason.
    pub async fn open_or_unavailable(config: &Config) -> Self {
        match Self::open(config).await {
            Ok(engine) => engine,
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(error = %reason, "store unavailable");
                Self::new(
                    Arc::new(UnavailableStore { reason }),
                    config.retrieval.default_limit,
                )
            }
        }
    }

    pub fn default_limit(&self) -> i64 {
        self.default_limit
    }

    /// Ranked search. `max_results` falls back to the configured default;
    /// zero or a negative value returns every hit.
    pub async fn search_knowledge(
        &self,
        query: &str,
        max_results: Option<i64>,
    ) -> Response<Vec<SearchResult>> {
        let limit = max_results.unwrap_or(self.default_limit);
        match self.store.search(query, limit).await {
            Ok(results) => Response::Success(results),
            Err(e) => {
                warn!(error = %e, "search failed");
                Response::Failure(e.to_string())
            }
        }
    }

    pub async fn get_document(&self, path: &str) -> Response<Option<Document>> {
        match self.store.get(path).await {
            Ok(doc) => Response::Success(doc),
            Err(e) => {
                warn!(error = %e, path, "document lookup failed");
                Response::Failure(e.to_string())
            }
        }
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(self.store.count().await?)
    }
}

/// Stand-in for a store that failed to open.
struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    fn error(&self) -> StoreError {
        StoreError::Unavailable(self.reason.clone())
    }
}

#[async_trait]
impl Store for UnavailableStore {
    async fn rebuild(&self, _documents: &[Document]) -> Result<(), StoreError> {
        Err(self.error())
    }

    async fn search(&self, _query: &str, _limit: i64) -> Result<Vec<SearchResult>, StoreError> {
        Err(self.error())
    }

    async fn get(&self, _path: &str) -> Result<Option<Document>, StoreError> {
        Err(self.error())
    }

    async fn count(&self) -> Result<i64, StoreError> {
        Err(self.error())
    }
}

/// CLI entry point for `kbh search`.
pub async fn run_search(config: &Config, query: &str, limit: Option<i64>, json: bool) -> Result<()> {
    let engine = QueryEngine::open(config).await?;
    let response = engine.search_knowledge(query, limit).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let results = match response.into_result() {
        Ok(results) => results,
        Err(e) => bail!("search failed: {}", e),
    };
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, result) in results.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, result.score, result.title);
        println!("    path: {}", result.path);
        println!("    excerpt: \"{}\"", result.snippet);
        println!();
    }
    Ok(())
}

/// CLI entry point for `kbh get`.
pub async fn run_get(config: &Config, path: &str, json: bool) -> Result<()> {
    let engine = QueryEngine::open(config).await?;
    let response = engine.get_document(path).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let doc = match response.into_result() {
        Ok(Some(doc)) => doc,
        Ok(None) => bail!("document not found: {}", path),
        Err(e) => bail!("lookup failed: {}", e),
    };
    println!("--- Document ---");
    println!("path:  {}", doc.path);
    println!("title: {}", doc.title);
    println!();
    println!("--- Content ---");
    println!("{}", doc.content);
    Ok(())
}

/// CLI entry point for `kbh status`.
pub async fn run_status(config: &Config) -> Result<()> {
    let engine = QueryEngine::open(config).await?;
    let count = engine.count().await?;
    println!("Knowledge Base Status");
    println!("=====================");
    println!("  Database:  {}", config.db.path.display());
    println!("  Documents: {}", count);
    Ok(())
}
