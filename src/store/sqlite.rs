//! SQLite FTS5 backend.
//!
//! Layout: a `documents` table keyed by an integer id with a unique `path`,
//! and an FTS5 table `documents_fts(title, content)` using the `unicode61`
//! tokenizer whose rowid is the document id. Ranking uses FTS5's built-in
//! `bm25()` and `snippet()` functions.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use super::{clamp_snippet_tokens, ensure_unique_paths, Store, StoreError, DEFAULT_SNIPPET_TOKENS};
use crate::db;
use crate::models::{Document, SearchResult};
use crate::tokenize::query_words;

pub struct SqliteStore {
    pool: SqlitePool,
    path: PathBuf,
    snippet_tokens: usize,
}

impl SqliteStore {
    /// Opens the store file, creating it and its schema if missing.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let pool = db::connect(path).await?;
        migrate(&pool).await?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
            snippet_tokens: DEFAULT_SNIPPET_TOKENS,
        })
    }

    /// Opens a store file that a previous `init` or ingest created. Never
    /// creates the file or its schema.
    pub async fn open_existing(path: &Path) -> Result<Self, StoreError> {
        let pool = db::connect_existing(path).await?;
        Ok(Self {
            pool,
            path: path.to_path_buf(),
            snippet_tokens: DEFAULT_SNIPPET_TOKENS,
        })
    }

    /// Sets the snippet window (clamped to what `snippet()` accepts).
    pub fn with_snippet_tokens(mut self, tokens: usize) -> Self {
        self.snippet_tokens = clamp_snippet_tokens(tokens);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Creates the schema. Safe to run on every open.
pub async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            content TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent, check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='documents_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE documents_fts USING fts5(
                title,
                content,
                tokenize='unicode61'
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Builds an FTS5 MATCH expression in which every word is a quoted
/// string, so operators and punctuation in user input are never parsed.
/// FTS5 folds each quoted word with the table's tokenizer.
pub fn match_expression(words: &[String]) -> String {
    words
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Store for SqliteStore {
    async fn rebuild(&self, documents: &[Document]) -> Result<(), StoreError> {
        ensure_unique_paths(documents)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM documents_fts")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents")
            .execute(&mut *tx)
            .await?;

        for (idx, doc) in documents.iter().enumerate() {
            let id = idx as i64 + 1;
            sqlx::query("INSERT INTO documents (id, path, title, content) VALUES (?, ?, ?, ?)")
                .bind(id)
                .bind(&doc.path)
                .bind(&doc.title)
                .bind(&doc.content)
                .execute(&mut *tx)
                .await?;
            sqlx::query("INSERT INTO documents_fts (rowid, title, content) VALUES (?, ?, ?)")
                .bind(id)
                .bind(&doc.title)
                .bind(&doc.content)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(documents = documents.len(), db = %self.path.display(), "index rebuilt");
        Ok(())
    }

    async fn search(&self, query: &str, limit: i64) -> Result<Vec<SearchResult>, StoreError> {
        let words = query_words(query);
        if words.is_empty() {
            debug!(query, "query has no searchable terms");
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            SELECT d.path, d.title,
                   snippet(documents_fts, 1, '<b>', '</b>', '…', {}) AS snippet,
                   bm25(documents_fts) AS score
            FROM documents_fts
            JOIN documents d ON d.id = documents_fts.rowid
            WHERE documents_fts MATCH ?
            ORDER BY score, documents_fts.rowid
            LIMIT ?
            "#,
            self.snippet_tokens
        );

        let rows = sqlx::query(&sql)
            .bind(match_expression(&words))
            .bind(if limit > 0 { limit } else { -1 })
            .fetch_all(&self.pool)
            .await?;

        let results = rows
            .iter()
            .map(|row| SearchResult {
                path: row.get("path"),
                title: row.get("title"),
                snippet: row.get("snippet"),
                score: row.get("score"),
            })
            .collect();

        Ok(results)
    }

    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query("SELECT path, title, content FROM documents WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Document {
            path: row.get("path"),
            title: row.get("title"),
            content: row.get("content"),
        }))
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(path: &str, title: &str, content: &str) -> Document {
        Document {
            path: path.to_string(),
            title: title.to_string(),
            content: content.to_string(),
        }
    }

    async fn open_temp() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("data").join("kb.sqlite"))
            .await
            .unwrap();
        (tmp, store)
    }

    #[test]
    fn match_expression_quotes_every_term() {
        let terms = vec!["hjart".to_string(), "or".to_string(), "a\"b".to_string()];
        assert_eq!(match_expression(&terms), "\"hjart\" \"or\" \"a\"\"b\"");
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kb.sqlite");
        let first = SqliteStore::open(&path).await.unwrap();
        first.close().await;
        let second = SqliteStore::open(&path).await.unwrap();
        assert_eq!(second.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn open_existing_never_creates_the_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data").join("kb.sqlite");
        assert!(SqliteStore::open_existing(&path).await.is_err());
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());

        SqliteStore::open(&path).await.unwrap().close().await;
        let store = SqliteStore::open_existing(&path).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rebuild_replaces_previous_contents() {
        let (_tmp, store) = open_temp().await;
        store
            .rebuild(&[doc("/a.txt", "a", "alpha"), doc("/b.txt", "b", "beta")])
            .await
            .unwrap();
        store.rebuild(&[doc("/c.txt", "c", "gamma")]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.get("/a.txt").await.unwrap().is_none());
        assert!(store.search("alpha", 5).await.unwrap().is_empty());
        assert_eq!(store.search("gamma", 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_paths_keep_previous_index() {
        let (_tmp, store) = open_temp().await;
        store.rebuild(&[doc("/a.txt", "a", "alpha")]).await.unwrap();

        let err = store
            .rebuild(&[doc("/x.txt", "x", "one"), doc("/x.txt", "x", "two")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePath(_)));
        assert_eq!(store.get("/a.txt").await.unwrap().unwrap().content, "alpha");
    }

    #[tokio::test]
    async fn search_requires_every_term() {
        let (_tmp, store) = open_temp().await;
        store
            .rebuild(&[
                doc("/1.txt", "one", "hjärtsvikt och behandling"),
                doc("/2.txt", "two", "hjärtsvikt utan annat"),
            ])
            .await
            .unwrap();

        let hits = store.search("Hjärtsvikt behandling", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "/1.txt");
        assert!(hits[0].snippet.contains("<b>hjärtsvikt</b>"));
        assert!(hits[0].score < 0.0);
    }

    #[tokio::test]
    async fn fts_syntax_in_query_is_harmless() {
        let (_tmp, store) = open_temp().await;
        store.rebuild(&[doc("/1.txt", "one", "alpha beta")]).await.unwrap();

        assert!(store.search("\"unbalanced AND (", 5).await.unwrap().is_empty());
        assert_eq!(store.search("alpha OR NOT", 5).await.unwrap().len(), 0);
        assert_eq!(store.search("alpha*", 5).await.unwrap().len(), 1);
        assert!(store.search("  --  ", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cyrillic_and_greek_words_are_found() {
        let (_tmp, store) = open_temp().await;
        store
            .rebuild(&[
                doc("/ru.txt", "ru", "Йогурт и кофе на завтрак"),
                doc("/el.txt", "el", "Η ἀγάπη μένει"),
            ])
            .await
            .unwrap();

        let hits = store.search("йогурт", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "/ru.txt");
        assert!(hits[0].snippet.contains("<b>Йогурт</b>"));

        let hits = store.search("ἀγάπη", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "/el.txt");
    }

    #[tokio::test]
    async fn non_positive_limit_returns_every_hit() {
        let (_tmp, store) = open_temp().await;
        let docs: Vec<Document> = (0..8)
            .map(|i| doc(&format!("/{}.txt", i), "t", "rutin"))
            .collect();
        store.rebuild(&docs).await.unwrap();

        assert_eq!(store.search("rutin", 3).await.unwrap().len(), 3);
        assert_eq!(store.search("rutin", 0).await.unwrap().len(), 8);
        assert_eq!(store.search("rutin", -1).await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn equal_scores_keep_insertion_order() {
        let (_tmp, store) = open_temp().await;
        store
            .rebuild(&[
                doc("/z.txt", "t", "same words"),
                doc("/a.txt", "t", "same words"),
                doc("/m.txt", "t", "same words"),
            ])
            .await
            .unwrap();

        let paths: Vec<String> = store
            .search("same", 0)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, vec!["/z.txt", "/a.txt", "/m.txt"]);
    }
}
