//! Artifact writer.
//!
//! Produces the two documents the site consumes:
//!
//! - **counts** (`data/site-counts.json`):
//!   `{ allShiurim: { total, breakdown, updated }, recent, recentByProgram }`
//! - **search index** (`data/search-index.json`): a flat list of
//!   `{ id, program, kind, title, url, date, page, title_lc }`
//!
//! Both are serialized and staged as temporary siblings before either
//! target is replaced. A failed run leaves the previous pair in place: never
//! a half-written file, never a new counts document beside a stale index.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::OutputConfig;
use crate::models::{IndexEntry, Item};
use crate::reconcile::Breakdown;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountsDocument {
    pub all_shiurim: CountSummary,
    pub recent: Vec<Item>,
    pub recent_by_program: BTreeMap<String, Vec<Item>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountSummary {
    pub total: u64,
    pub breakdown: Breakdown,
    /// `YYYY-MM-DD` of the run.
    pub updated: String,
}

impl CountSummary {
    pub fn new(breakdown: Breakdown, updated: NaiveDate) -> Self {
        Self {
            total: breakdown.total(),
            breakdown,
            updated: updated.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Everything one run publishes.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifacts {
    pub counts: CountsDocument,
    pub index: Vec<IndexEntry>,
}

impl Artifacts {
    /// Pretty JSON for both documents, in (counts, index) order.
    pub fn to_json(&self) -> Result<(String, String)> {
        let counts = serde_json::to_string_pretty(&self.counts)?;
        let index = serde_json::to_string_pretty(&self.index)?;
        Ok((counts, index))
    }
}

/// Overwrite both output files, or neither.
///
/// Both documents are staged as `.tmp` siblings before either target is
/// touched. If the second rename fails, the first target is restored from
/// its backup, so a failed write never pairs a new counts document with a
/// stale index.
pub fn write_artifacts(output: &OutputConfig, base: &Path, artifacts: &Artifacts) -> Result<()> {
    let (counts, index) = artifacts.to_json()?;
    let counts_path = base.join(&output.counts);
    let index_path = base.join(&output.search_index);

    let counts_tmp = stage(&counts_path, &counts)?;
    let index_tmp = match stage(&index_path, &index) {
        Ok(tmp) => tmp,
        Err(e) => {
            let _ = std::fs::remove_file(&counts_tmp);
            return Err(e);
        }
    };

    if let Err(e) = commit_pair((&counts_tmp, &counts_path), (&index_tmp, &index_path)) {
        let _ = std::fs::remove_file(&counts_tmp);
        let _ = std::fs::remove_file(&index_tmp);
        return Err(e);
    }

    info!(
        total = artifacts.counts.all_shiurim.total,
        index_entries = artifacts.index.len(),
        counts = %counts_path.display(),
        search_index = %index_path.display(),
        "artifacts written"
    );
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write `content` next to `path` and return the temporary file.
fn stage(path: &Path, content: &str) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let tmp = sibling(path, ".tmp");
    std::fs::write(&tmp, format!("{}\n", content))
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    Ok(tmp)
}

/// Rename both staged files into place, undoing the first on failure.
fn commit_pair(first: (&Path, &Path), second: (&Path, &Path)) -> Result<()> {
    let (first_tmp, first_path) = first;
    let (second_tmp, second_path) = second;

    let backup = sibling(first_path, ".bak");
    let had_previous = first_path.is_file();
    if had_previous {
        std::fs::copy(first_path, &backup)
            .with_context(|| format!("Failed to back up {}", first_path.display()))?;
    }

    let result = match std::fs::rename(first_tmp, first_path) {
        Err(e) => Err(e).with_context(|| format!("Failed to replace {}", first_path.display())),
        Ok(()) => match std::fs::rename(second_tmp, second_path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let restored = if had_previous {
                    std::fs::rename(&backup, first_path)
                } else {
                    std::fs::remove_file(first_path)
                };
                if let Err(re) = restored {
                    warn!(path = %first_path.display(), error = %re, "could not restore previous artifact");
                }
                Err(e).with_context(|| format!("Failed to replace {}", second_path.display()))
            }
        },
    };

    let _ = std::fs::remove_file(&backup);
    result
}
