//! Core data models used throughout the pipeline.
//!
//! Items flow from three kinds of sources (rendered pages, the playlist
//! catalog, flat data files) into the recency lists and the search index.
//! Counts live in [`crate::reconcile`]; these types only describe items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::dates;

/// Media kind of a program's items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Audio,
    Video,
}

/// Stable identity of an item: the owning program plus the natural key the
/// source uses for it (video id, record id, URL, or tree position).
///
/// Deduplication compares these values, never formatted strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId {
    program: String,
    key: String,
}

impl ItemId {
    pub fn new(program: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            key: key.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.program, self.key)
    }
}

impl Serialize for ItemId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A single piece of content (one shiur) discovered by any source.
///
/// `title` is never empty: every producer substitutes the program's default
/// title. `date` is `None` when the source gave no usable date; such items
/// can be searched but never appear in a recency list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub id: ItemId,
    pub program: String,
    pub kind: Kind,
    pub title: String,
    pub url: Option<String>,
    #[serde(serialize_with = "dates::serialize_canonical")]
    pub date: Option<DateTime<Utc>>,
    /// Site path of the page this item belongs to.
    pub page: Option<String>,
}

/// A search index row: the item plus its normalized title key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexEntry {
    #[serde(flatten)]
    pub item: Item,
    pub title_lc: String,
}

impl IndexEntry {
    pub fn new(item: Item) -> Self {
        let title_lc = normalize_title(&item.title);
        Self { item, title_lc }
    }
}

/// Lowercased, trimmed title used for substring matching by the site search.
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Pick the first non-blank candidate title, else the fallback.
pub fn title_or(candidates: &[Option<&str>], fallback: &str) -> String {
    candidates
        .iter()
        .flatten()
        .map(|t| t.trim())
        .find(|t| !t.is_empty())
        .unwrap_or(fallback)
        .to_string()
}
