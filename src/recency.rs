//! Recency lists and the search index.
//!
//! Per-program lists are sorted newest first and truncated; the overall
//! list is a k-way merge of those already-sorted lists, so its cost does
//! not depend on how many items each program has. Items without a date
//! never enter a recency list but stay searchable.

use std::collections::{BTreeMap, HashSet};

use crate::models::{IndexEntry, Item};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recency {
    pub overall: Vec<Item>,
    pub by_program: BTreeMap<String, Vec<Item>>,
}

/// Drop later duplicates of the same [`ItemId`](crate::models::ItemId).
pub fn dedup(items: Vec<Item>) -> Vec<Item> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .collect()
}

/// Newest first; equal dates fall back to id order so output is stable
/// across runs.
fn newest_first(a: &Item, b: &Item) -> std::cmp::Ordering {
    b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id))
}

pub fn build_recency(
    per_program: &BTreeMap<String, Vec<Item>>,
    overall_limit: usize,
    per_program_limit: usize,
) -> Recency {
    let mut by_program = BTreeMap::new();
    for (program, items) in per_program {
        let mut dated: Vec<Item> = items.iter().filter(|i| i.date.is_some()).cloned().collect();
        dated.sort_by(newest_first);
        dated.truncate(per_program_limit);
        by_program.insert(program.clone(), dated);
    }

    let overall = merge_newest(&by_program, overall_limit);
    Recency { overall, by_program }
}

/// Merge already-sorted lists, taking at most `limit` items.
fn merge_newest(lists: &BTreeMap<String, Vec<Item>>, limit: usize) -> Vec<Item> {
    let lists: Vec<&Vec<Item>> = lists.values().collect();
    let mut heads = vec![0usize; lists.len()];
    let mut out = Vec::with_capacity(limit);

    while out.len() < limit {
        let mut best: Option<usize> = None;
        for (i, list) in lists.iter().enumerate() {
            let Some(candidate) = list.get(heads[i]) else {
                continue;
            };
            let better = match best {
                None => true,
                Some(b) => newest_first(candidate, &lists[b][heads[b]]).is_lt(),
            };
            if better {
                best = Some(i);
            }
        }
        let Some(i) = best else { break };
        out.push(lists[i][heads[i]].clone());
        heads[i] += 1;
    }

    out
}

/// Every item with a non-blank title and a URL, newest first, undated last.
pub fn build_index(items: &[Item]) -> Vec<IndexEntry> {
    let mut kept: Vec<&Item> = items
        .iter()
        .filter(|i| !i.title.trim().is_empty())
        .filter(|i| i.url.as_deref().is_some_and(|u| !u.trim().is_empty()))
        .collect();
    kept.sort_by(|a, b| newest_first(a, b));
    kept.into_iter().cloned().map(IndexEntry::new).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_mdy;
    use crate::models::{ItemId, Kind};

    fn item(program: &str, key: &str, date: Option<&str>) -> Item {
        Item {
            id: ItemId::new(program, key),
            program: program.to_string(),
            kind: Kind::Audio,
            title: format!("{} {}", program, key),
            url: Some(format!("https://cdn/{}/{}", program, key)),
            date: date.and_then(parse_mdy),
            page: None,
        }
    }

    fn sample() -> BTreeMap<String, Vec<Item>> {
        let mut map = BTreeMap::new();
        map.insert(
            "halacha".to_string(),
            vec![
                item("halacha", "a", Some("1/1/2024")),
                item("halacha", "b", Some("3/1/2024")),
                item("halacha", "c", None),
                item("halacha", "d", Some("2/10/2024")),
            ],
        );
        map.insert(
            "parsha".to_string(),
            vec![
                item("parsha", "x", Some("2/15/2024")),
                item("parsha", "y", Some("12/1/2023")),
            ],
        );
        map
    }

    fn keys(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.id.key()).collect()
    }

    #[test]
    fn test_per_program_sorted_and_undated_excluded() {
        let recency = build_recency(&sample(), 5, 10);
        assert_eq!(keys(&recency.by_program["halacha"]), vec!["b", "d", "a"]);
        assert_eq!(keys(&recency.by_program["parsha"]), vec!["x", "y"]);
    }

    #[test]
    fn test_overall_is_merge_of_program_lists() {
        let recency = build_recency(&sample(), 4, 10);
        assert_eq!(keys(&recency.overall), vec!["b", "x", "d", "a"]);
    }

    #[test]
    fn test_limits_respected() {
        let recency = build_recency(&sample(), 2, 1);
        assert_eq!(keys(&recency.by_program["halacha"]), vec!["b"]);
        assert_eq!(keys(&recency.overall), vec!["b", "x"]);
    }

    #[test]
    fn test_newer_always_precedes_older() {
        let recency = build_recency(&sample(), 10, 10);
        for list in std::iter::once(&recency.overall).chain(recency.by_program.values()) {
            for pair in list.windows(2) {
                assert!(pair[0].date >= pair[1].date);
            }
        }
    }

    #[test]
    fn test_index_filters_and_orders() {
        let mut items: Vec<Item> = sample().into_values().flatten().collect();
        let mut no_url = item("parsha", "z", Some("5/5/2024"));
        no_url.url = None;
        items.push(no_url);

        let index = build_index(&items);
        assert_eq!(index.len(), 6);
        assert_eq!(index[0].item.id.key(), "b");
        assert!(index.last().unwrap().item.date.is_none());
        assert_eq!(index[0].title_lc, "halacha b");
    }

    #[test]
    fn test_dedup_keeps_first() {
        let mut first = item("parsha", "x", Some("1/1/2024"));
        first.title = "first".to_string();
        let items = vec![first, item("parsha", "x", None), item("parsha", "y", None)];
        let deduped = dedup(items);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].title, "first");
    }
}
