//! Ingestion pipeline orchestration.
//!
//! Coordinates the full rebuild: scan → extraction → normalization →
//! store. Every run replaces the whole index; there is no incremental
//! state between runs. Per-file extraction failures are counted as
//! skipped and never abort the run; only store failures are fatal.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::{Config, ExtractConfig};
use crate::extract::extract_file;
use crate::models::{Document, SourceFile};
use crate::normalize::normalize;
use crate::scan::scan_sources;
use crate::store::{SqliteStore, Store};

/// Outcome of one ingestion run.
///
/// `indexed + skipped` equals the number of eligible files found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub indexed: usize,
    pub skipped: usize,
}

/// Rebuilds `store` from every eligible file under `roots`.
pub async fn ingest(store: &dyn Store, roots: &[PathBuf], config: &Config) -> Result<IngestReport> {
    let files = scan_sources(roots, &config.sources.exclude_globs)?;
    debug!(files = files.len(), "eligible source files");

    let settings = config.extract.clone();
    let (documents, skipped) =
        tokio::task::spawn_blocking(move || extract_all(&files, &settings))
            .await
            .context("extraction task failed")?;

    store
        .rebuild(&documents)
        .await
        .context("Failed to rebuild index")?;

    let report = IngestReport {
        indexed: documents.len(),
        skipped,
    };
    info!(indexed = report.indexed, skipped = report.skipped, "ingestion finished");
    Ok(report)
}

fn extract_all(files: &[SourceFile], settings: &ExtractConfig) -> (Vec<Document>, usize) {
    let mut documents = Vec::with_capacity(files.len());
    let mut skipped = 0;

    for file in files {
        let content = normalize(&extract_file(&file.path, file.format, settings).into_text());
        if content.is_empty() {
            debug!(path = %file.path.display(), "no text extracted, skipping");
            skipped += 1;
            continue;
        }
        debug!(path = %file.path.display(), chars = content.len(), "extracted");
        documents.push(Document::from_source(&file.path, content));
    }

    (documents, skipped)
}

/// `kbh ingest`: rebuilds the store file named in `config` and prints the
/// counts.
pub async fn run_ingest(config: &Config, roots: &[PathBuf]) -> Result<()> {
    let store = SqliteStore::open(&config.db.path)
        .await
        .with_context(|| format!("Failed to open store: {}", config.db.path.display()))?
        .with_snippet_tokens(config.retrieval.snippet_tokens);

    let report = ingest(&store, roots, config).await?;
    store.close().await;

    println!(
        "Indexed {} files, skipped {}. DB: {}",
        report.indexed,
        report.skipped,
        config.db.path.display()
    );
    Ok(())
}
