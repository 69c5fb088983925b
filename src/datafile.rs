//! Flat per-program data files.
//!
//! A data file is JSON holding either a bare list of records or an object
//! with a named list field. Each record carries an identity, a description
//! (or a filename), a free-text `M/D/YYYY` date and a URL:
//!
//! ```json
//! [ { "id": 17, "description": "Kibbud Av", "date": "1/5/2024", "url": "https://..." } ]
//! ```
//!
//! A record without a date is kept with a null date (searchable, never
//! "recent"). A record whose date is present but unparseable is dropped.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::config::ProgramConfig;
use crate::dates;
use crate::flatten::natural_key;
use crate::models::{title_or, Item, ItemId};

/// Read `path` (relative to the site root) and convert its records.
pub fn read_items(
    program: &ProgramConfig,
    root: &Path,
    path: &Path,
    list_field: Option<&str>,
) -> Result<Vec<Item>> {
    let full = root.join(path.strip_prefix("/").unwrap_or(path));
    let content = std::fs::read_to_string(&full)
        .with_context(|| format!("Failed to read data file: {}", full.display()))?;
    let doc: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse data file: {}", full.display()))?;
    parse_items(program, &doc, list_field)
}

pub fn parse_items(program: &ProgramConfig, doc: &Value, list_field: Option<&str>) -> Result<Vec<Item>> {
    let records = match (doc, list_field) {
        (Value::Array(records), _) => records,
        (Value::Object(map), Some(field)) => match map.get(field) {
            Some(Value::Array(records)) => records,
            _ => bail!("data file has no list field '{}'", field),
        },
        (Value::Object(_), None) => bail!("data file is an object but no list_field is configured"),
        _ => bail!("data file is neither a list nor an object"),
    };

    let fallback = program.default_title();
    let mut items = Vec::with_capacity(records.len());
    let mut dropped = 0usize;

    for (index, record) in records.iter().enumerate() {
        let date = match text(record, "date") {
            None => None,
            Some(raw) => match dates::parse_mdy(raw) {
                Some(d) => Some(d),
                None => {
                    dropped += 1;
                    continue;
                }
            },
        };

        let url = text(record, "url").map(String::from);
        let key = natural_key(record, url.as_deref()).unwrap_or_else(|| index.to_string());

        items.push(Item {
            id: ItemId::new(&program.key, key),
            program: program.key.clone(),
            kind: program.kind,
            title: title_or(&[text(record, "description"), text(record, "filename")], &fallback),
            url,
            date,
            page: program.page.clone(),
        });
    }

    if dropped > 0 {
        debug!(program = %program.key, dropped, "dropped records with unparseable dates");
    }
    Ok(items)
}

/// Non-blank string field.
fn text<'a>(record: &'a Value, field: &str) -> Option<&'a str> {
    record
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}
