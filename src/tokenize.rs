//! Unicode-aware word tokenization shared by indexing and querying.
//!
//! Mirrors SQLite's `unicode61` tokenizer closely enough that the SQLite and
//! in-memory backends agree on what a term is: a token is a maximal run of
//! alphanumeric characters (combining marks stay attached), and terms are
//! lowercased. Diacritics are removed from Latin letters only; Cyrillic,
//! Greek and other scripts keep their marks, as `unicode61` does.

use unicode_normalization::char::{decompose_canonical, is_combining_mark};

/// A term and the byte range it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub term: String,
    pub start: usize,
    pub end: usize,
}

fn is_token_char(c: char) -> bool {
    c.is_alphanumeric() || is_combining_mark(c)
}

/// Latin letters whose diacritics `unicode61` strips.
fn is_latin(c: char) -> bool {
    c.is_ascii_alphabetic()
        || matches!(c, '\u{00C0}'..='\u{024F}' | '\u{1E00}'..='\u{1EFF}')
}

/// Folds a raw word into its index term.
pub fn fold(word: &str) -> String {
    let mut term = String::with_capacity(word.len());
    let mut after_latin = false;
    for c in word.chars() {
        if is_latin(c) {
            decompose_canonical(c, |d| {
                if !is_combining_mark(d) {
                    term.extend(d.to_lowercase());
                }
            });
            after_latin = true;
        } else if is_combining_mark(c) {
            if !after_latin {
                term.push(c);
            }
        } else {
            term.extend(c.to_lowercase());
            after_latin = false;
        }
    }
    term
}

/// Splits `text` into tokens, keeping byte offsets into the original string.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (idx, c) in text.char_indices() {
        match (is_token_char(c), start) {
            (true, None) => start = Some(idx),
            (false, Some(s)) => {
                push_token(&mut tokens, text, s, idx);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        push_token(&mut tokens, text, s, text.len());
    }
    tokens
}

fn push_token(tokens: &mut Vec<Token>, text: &str, start: usize, end: usize) {
    let term = fold(&text[start..end]);
    if !term.is_empty() {
        tokens.push(Token { term, start, end });
    }
}

/// Tokenizes a user query into its terms, in query order.
///
/// Repeated terms are kept; each counts as its own phrase when ranking.
pub fn query_terms(query: &str) -> Vec<String> {
    tokenize(query).into_iter().map(|t| t.term).collect()
}

/// The query's words as typed, in query order.
///
/// SQLite applies its own folding to these, so non-Latin words reach FTS5
/// unchanged.
pub fn query_words(query: &str) -> Vec<String> {
    tokenize(query)
        .into_iter()
        .map(|t| query[t.start..t.end].to_string())
        .collect()
}
