//! Script-less renderer.
//!
//! Fetches pages over plain HTTP and parses the HTML. No page script runs,
//! so only values present in the served markup can be read:
//!
//! - DOM probes: `element.getAttribute(attribute)` for the first match.
//! - Datasets and the breakdown fragment: a
//!   `<script type="application/json" id="NAME">` block whose `id` (or
//!   `data-global` attribute) equals the requested global path.
//!
//! Readiness predicates cannot be evaluated here; a page that declares one
//! is reported as [`Readiness::Failed`] and the pipeline proceeds.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::render::{Readiness, Snapshot, SnapshotRequest};
use crate::traits::PageRenderer;

pub struct StaticRenderer {
    client: reqwest::Client,
    base_url: String,
}

impl StaticRenderer {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PageRenderer for StaticRenderer {
    fn name(&self) -> &str {
        "static"
    }

    async fn render(&mut self, path: &str, request: &SnapshotRequest) -> Result<Snapshot> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to load {}", url))?;
        if !resp.status().is_success() {
            bail!("GET {} returned HTTP {}", url, resp.status());
        }
        let html = resp.text().await?;

        let readiness = match request.ready {
            Some(_) => Readiness::Failed("static renderer cannot evaluate readiness predicates".to_string()),
            None => Readiness::Ready,
        };
        Ok(extract(path, readiness, &html, request))
    }
}

/// Read the requested values out of parsed markup.
pub fn extract(path: &str, readiness: Readiness, html: &str, request: &SnapshotRequest) -> Snapshot {
    let doc = Html::parse_document(html);
    let mut snapshot = Snapshot::empty(path, readiness);

    for probe in &request.probes {
        let Ok(selector) = Selector::parse(&probe.selector) else {
            warn!(selector = %probe.selector, page = path, "invalid DOM probe selector");
            continue;
        };
        if let Some(value) = doc
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr(&probe.attribute))
        {
            snapshot.attributes.insert(probe.key(), value.to_string());
        }
    }

    let blocks = json_blocks(&doc, path);
    for name in &request.datasets {
        if let Some(value) = lookup(&blocks, name) {
            snapshot.datasets.insert(name.clone(), value);
        }
    }
    if let Some(name) = &request.breakdown_global {
        snapshot.breakdown = lookup(&blocks, name);
    }

    snapshot
}

/// `(name, parsed body)` of every JSON script block that carries a name.
fn json_blocks(doc: &Html, path: &str) -> Vec<(String, Value)> {
    let Ok(selector) = Selector::parse(r#"script[type="application/json"]"#) else {
        return Vec::new();
    };
    doc.select(&selector)
        .filter_map(|el| {
            let name = el.value().attr("data-global").or_else(|| el.value().id())?;
            let text: String = el.text().collect();
            match serde_json::from_str(&text) {
                Ok(value) => Some((name.to_string(), value)),
                Err(e) => {
                    warn!(block = name, page = path, error = %e, "unparseable JSON block");
                    None
                }
            }
        })
        .collect()
}

fn lookup(blocks: &[(String, Value)], name: &str) -> Option<Value> {
    blocks
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.clone())
        .filter(|v| !v.is_null())
}
