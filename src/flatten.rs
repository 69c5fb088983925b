//! Category flattener.
//!
//! Some pages expose their catalogue as a three-level tree:
//!
//! ```json
//! [
//!   { "title": "Shabbos",
//!     "subcategories": [
//!       { "title": "Muktzah",
//!         "items": [ { "title": "Intro", "note": "1/5/2024", "url": "https://..." } ] } ] }
//! ]
//! ```
//!
//! Each leaf becomes one [`Item`]. A leaf whose `note` is not a valid
//! `M/D/YYYY` date is dropped: it can be neither ranked nor deduplicated
//! reliably.

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ProgramConfig;
use crate::dates;
use crate::models::{title_or, Item, ItemId};

/// Flatten a category tree into fresh items for `program`.
///
/// The output order follows the tree but carries no meaning; callers sort.
pub fn flatten(program: &ProgramConfig, tree: &Value) -> Vec<Item> {
    let Some(categories) = tree.as_array() else {
        warn!(program = %program.key, "category dataset is not a list, ignoring");
        return Vec::new();
    };

    let fallback = program.default_title();
    let mut out = Vec::new();
    let mut dropped = 0usize;

    for (ci, category) in categories.iter().enumerate() {
        for (si, sub) in children(category, "subcategories").iter().enumerate() {
            for (ii, leaf) in children(sub, "items").iter().enumerate() {
                let note = leaf.get("note").and_then(Value::as_str);
                let Some(date) = note.and_then(dates::parse_mdy) else {
                    dropped += 1;
                    continue;
                };

                let url = leaf.get("url").and_then(Value::as_str).map(String::from);
                let key = natural_key(leaf, url.as_deref())
                    .unwrap_or_else(|| format!("{}.{}.{}", ci, si, ii));

                out.push(Item {
                    id: ItemId::new(&program.key, key),
                    program: program.key.clone(),
                    kind: program.kind,
                    title: title_or(&[leaf.get("title").and_then(Value::as_str)], &fallback),
                    url,
                    date: Some(date),
                    page: program.page.clone(),
                });
            }
        }
    }

    if dropped > 0 {
        debug!(program = %program.key, dropped, "dropped leaves with unparseable dates");
    }
    out
}

fn children<'a>(node: &'a Value, field: &str) -> &'a [Value] {
    node.get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Explicit `id` (string or number), else the URL.
pub(crate) fn natural_key(record: &Value, url: Option<&str>) -> Option<String> {
    match record.get("id") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => url.filter(|u| !u.trim().is_empty()).map(String::from),
    }
}
