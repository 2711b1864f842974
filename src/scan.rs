//! Source discovery: walks the configured roots and returns the files the
//! extractor can handle.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::models::{SourceFile, SourceFormat};

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**"];

/// Lists eligible files under `roots`, in root order and then file-name
/// order within each root.
///
/// Roots that do not exist are skipped. A file reachable from two
/// overlapping roots is listed once.
pub fn scan_sources(roots: &[PathBuf], exclude_globs: &[String]) -> Result<Vec<SourceFile>> {
    let mut patterns: Vec<String> = DEFAULT_EXCLUDES.iter().map(|p| p.to_string()).collect();
    patterns.extend(exclude_globs.iter().cloned());
    let exclude_set = build_globset(&patterns)?;

    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for root in roots {
        let root = match root.canonicalize() {
            Ok(root) if root.is_dir() => root,
            _ => {
                debug!(root = %root.display(), "source root missing, skipping");
                continue;
            }
        };

        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&root).unwrap_or(path);
            if exclude_set.is_match(relative) {
                continue;
            }
            if is_temp_file(path) {
                debug!(path = %path.display(), "temporary file, skipping");
                continue;
            }
            let format = SourceFormat::from_path(path);
            if !format.is_supported() {
                continue;
            }
            if !seen.insert(path.to_path_buf()) {
                continue;
            }

            files.push(SourceFile {
                path: path.to_path_buf(),
                format,
            });
        }
    }

    Ok(files)
}

/// Office lock files (`~$report.docx`) and editor backups (`notes~.txt`).
pub fn is_temp_file(path: &Path) -> bool {
    let starts = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with('~'))
        .unwrap_or(false);
    let ends = path
        .file_stem()
        .map(|s| s.to_string_lossy().ends_with('~'))
        .unwrap_or(false);
    starts || ends
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
