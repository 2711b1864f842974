//! TOML configuration.
//!
//! Every section is optional. The store location is always an explicit
//! value carried by [`Config`]; nothing reads a process-wide default.

use anyhow::{bail, Context, Result};
use globset::Glob;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::store::MAX_SNIPPET_TOKENS;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/kb.sqlite")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    /// Directories scanned by `kbh ingest` when no `--src` is given.
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    /// Glob patterns (relative to each root) excluded from the scan, on top
    /// of the built-in VCS excludes.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: i64,
    #[serde(default = "default_snippet_tokens")]
    pub snippet_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            snippet_tokens: default_snippet_tokens(),
        }
    }
}

fn default_limit() -> i64 {
    5
}
fn default_snippet_tokens() -> usize {
    12
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    /// Attempts per file read before giving up on transient I/O errors.
    #[serde(default = "default_read_attempts")]
    pub read_attempts: u32,
    /// Files larger than this are skipped without decoding.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            read_attempts: default_read_attempts(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_read_attempts() -> u32 {
    3
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

impl Config {
    /// Defaults everywhere except the store location.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.retrieval.default_limit < 1 {
            bail!("retrieval.default_limit must be >= 1");
        }
        if self.retrieval.snippet_tokens == 0 || self.retrieval.snippet_tokens > MAX_SNIPPET_TOKENS {
            bail!("retrieval.snippet_tokens must be between 1 and {}", MAX_SNIPPET_TOKENS);
        }
        if self.extract.read_attempts == 0 {
            bail!("extract.read_attempts must be >= 1");
        }
        if self.extract.max_file_bytes == 0 {
            bail!("extract.max_file_bytes must be > 0");
        }
        for pattern in &self.sources.exclude_globs {
            Glob::new(pattern)
                .with_context(|| format!("invalid sources.exclude_globs pattern: {}", pattern))?;
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
