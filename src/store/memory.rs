//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Keeps a postings list per term and reproduces the SQLite backend's
//! ranking: FTS5's BM25 over title and content as one document, with the
//! same snippet window. A rebuild builds the new index without holding the
//! lock and swaps it in under a short write lock.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    clamp_snippet_tokens, ensure_unique_paths, Store, StoreError, DEFAULT_SNIPPET_TOKENS, ELLIPSIS,
};
use crate::models::{Document, SearchResult};
use crate::tokenize::{query_terms, tokenize, Token};

const K1: f64 = 1.2;
const B: f64 = 0.75;
const MIN_IDF: f64 = 1e-6;

struct Entry {
    doc: Document,
    /// Tokens in title plus content.
    len: usize,
}

#[derive(Default)]
struct Index {
    entries: Vec<Entry>,
    by_path: HashMap<String, usize>,
    /// term -> (entry index, occurrences), entry indices ascending.
    postings: HashMap<String, Vec<(usize, u32)>>,
    total_tokens: usize,
}

impl Index {
    fn build(documents: &[Document]) -> Self {
        let mut index = Index::default();
        for (idx, doc) in documents.iter().enumerate() {
            let mut counts: HashMap<String, u32> = HashMap::new();
            let mut len = 0;
            for token in tokenize(&doc.title)
                .into_iter()
                .chain(tokenize(&doc.content))
            {
                *counts.entry(token.term).or_insert(0) += 1;
                len += 1;
            }
            for (term, freq) in counts {
                index.postings.entry(term).or_default().push((idx, freq));
            }
            index.total_tokens += len;
            index.by_path.insert(doc.path.clone(), idx);
            index.entries.push(Entry {
                doc: doc.clone(),
                len,
            });
        }
        for list in index.postings.values_mut() {
            list.sort_unstable_by_key(|(idx, _)| *idx);
        }
        index
    }

    fn freq(&self, term: &str, entry: usize) -> u32 {
        self.postings
            .get(term)
            .and_then(|list| {
                list.binary_search_by_key(&entry, |(idx, _)| *idx)
                    .ok()
                    .map(|pos| list[pos].1)
            })
            .unwrap_or(0)
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.entries.len() as f64;
        let hits = self.postings.get(term).map_or(0, Vec::len) as f64;
        let idf = ((n - hits + 0.5) / (hits + 0.5)).ln();
        if idf <= 0.0 {
            MIN_IDF
        } else {
            idf
        }
    }

    /// Entries containing every term, ascending.
    fn candidates(&self, terms: &[String]) -> Vec<usize> {
        let mut lists: Vec<&Vec<(usize, u32)>> = Vec::with_capacity(terms.len());
        for term in terms {
            match self.postings.get(term) {
                Some(list) => lists.push(list),
                None => return Vec::new(),
            }
        }
        lists.sort_by_key(|l| l.len());
        let (shortest, rest) = match lists.split_first() {
            Some(split) => split,
            None => return Vec::new(),
        };
        shortest
            .iter()
            .map(|(idx, _)| *idx)
            .filter(|idx| {
                rest.iter()
                    .all(|l| l.binary_search_by_key(idx, |(i, _)| *i).is_ok())
            })
            .collect()
    }

    fn score(&self, terms: &[String], entry: usize) -> f64 {
        let avgdl = self.total_tokens as f64 / self.entries.len() as f64;
        let dl = self.entries[entry].len as f64;
        let mut score = 0.0;
        for term in terms {
            let f = self.freq(term, entry) as f64;
            let tf = f * (K1 + 1.0) / (f + K1 * (1.0 - B + B * dl / avgdl));
            score += self.idf(term) * tf;
        }
        -score
    }
}

/// In-memory store. Nothing is persisted.
pub struct InMemoryStore {
    index: RwLock<Index>,
    snippet_tokens: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(Index::default()),
            snippet_tokens: DEFAULT_SNIPPET_TOKENS,
        }
    }

    pub fn with_snippet_tokens(mut self, tokens: usize) -> Self {
        self.snippet_tokens = clamp_snippet_tokens(tokens);
        self
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn rebuild(&self, documents: &[Document]) -> Result<(), StoreError> {
        ensure_unique_paths(documents)?;
        let fresh = Index::build(documents);
        *self.index.write().await = fresh;
        Ok(())
    }

    async fn search(&self, query: &str, limit: i64) -> Result<Vec<SearchResult>, StoreError> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let index = self.index.read().await;
        let mut scored: Vec<(f64, usize)> = index
            .candidates(&terms)
            .into_iter()
            .map(|entry| (index.score(&terms, entry), entry))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        if limit > 0 {
            scored.truncate(limit as usize);
        }

        let wanted: HashSet<&str> = terms.iter().map(String::as_str).collect();
        Ok(scored
            .into_iter()
            .map(|(score, entry)| {
                let doc = &index.entries[entry].doc;
                SearchResult {
                    path: doc.path.clone(),
                    title: doc.title.clone(),
                    snippet: snippet(&doc.content, &wanted, self.snippet_tokens),
                    score,
                }
            })
            .collect())
    }

    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        let index = self.index.read().await;
        Ok(index
            .by_path
            .get(path)
            .map(|&idx| index.entries[idx].doc.clone()))
    }

    async fn count(&self) -> Result<i64, StoreError> {
        Ok(self.index.read().await.entries.len() as i64)
    }
}

/// Cuts a `window`-token excerpt of `text` around the first matching token.
///
/// The window starts so the first match and as many following matches as
/// fit are centred, and is pulled back when it would run past the end.
/// Text before the first token and after the last one is kept when the
/// window touches that edge.
fn snippet(text: &str, terms: &HashSet<&str>, window: usize) -> String {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return String::new();
    }
    let is_match = |t: &Token| terms.contains(t.term.as_str());

    let start = match tokens.iter().position(is_match) {
        Some(first) => {
            let last = tokens[first..]
                .iter()
                .take(window)
                .rposition(is_match)
                .map_or(first, |off| first + off);
            let span = last - first + 1;
            let start = first.saturating_sub((window - span) / 2);
            start.min(tokens.len().saturating_sub(window))
        }
        None => 0,
    };
    let end = (start + window).min(tokens.len());

    let mut out = String::new();
    let mut cursor = if start == 0 {
        0
    } else {
        out.push_str(ELLIPSIS);
        tokens[start].start
    };
    for token in &tokens[start..end] {
        out.push_str(&text[cursor..token.start]);
        if is_match(token) {
            out.push_str("<b>");
            out.push_str(&text[token.start..token.end]);
            out.push_str("</b>");
        } else {
            out.push_str(&text[token.start..token.end]);
        }
        cursor = token.end;
    }
    if end == tokens.len() {
        out.push_str(&text[cursor..]);
    } else {
        out.push_str(ELLIPSIS);
    }
    out
}
