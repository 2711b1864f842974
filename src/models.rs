//! Core data models used throughout the knowledge harness.
//!
//! These types represent the source files, indexed documents, and search
//! results that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File format detected from a source file's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Pdf,
    Docx,
    /// Office Open XML workbook (`.xlsx`).
    Spreadsheet,
    /// Legacy BIFF workbook (`.xls`).
    LegacySpreadsheet,
    Markdown,
    PlainText,
    Unsupported,
}

impl SourceFormat {
    /// Detects the format from the file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("pdf") => SourceFormat::Pdf,
            Some("docx") => SourceFormat::Docx,
            Some("xlsx") => SourceFormat::Spreadsheet,
            Some("xls") => SourceFormat::LegacySpreadsheet,
            Some("md") => SourceFormat::Markdown,
            Some("txt") => SourceFormat::PlainText,
            _ => SourceFormat::Unsupported,
        }
    }

    pub fn is_supported(self) -> bool {
        self != SourceFormat::Unsupported
    }
}

/// An eligible file found under one of the source roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub format: SourceFormat,
}

/// Indexed unit: normalized text plus its path and title.
///
/// `path` is the unique key in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub path: String,
    pub title: String,
    pub content: String,
}

impl Document {
    /// Builds a document for `path`, titled with the file stem.
    pub fn from_source(path: &Path, content: String) -> Self {
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path: path.to_string_lossy().into_owned(),
            title,
            content,
        }
    }
}

/// A ranked search hit.
///
/// `score` is the raw BM25 value: lower means more relevant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub title: String,
    pub snippet: String,
    pub score: f64,
}
