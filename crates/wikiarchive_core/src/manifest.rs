use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::archive::ArchiveRecord;
use crate::discovery::TopicIndex;

/// Run summary written once at the end: per-topic discovery and per-page fetch outcome.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Manifest {
    pub categories: TopicIndex,
    pub fetched: Vec<ArchiveRecord>,
}

impl Manifest {
    pub fn new(categories: TopicIndex, fetched: Vec<ArchiveRecord>) -> Self {
        Self {
            categories,
            fetched,
        }
    }

    pub fn archived(&self) -> usize {
        self.fetched.iter().filter(|record| record.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.fetched.len() - self.archived()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }
}

/// Pretty JSON written to a sibling temp file, then renamed over `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;

    let mut rendered = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    rendered.push('\n');

    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(rendered.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    tmp.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    tmp.persist(path)
        .map_err(|error| error.error)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
