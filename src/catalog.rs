//! Paginated catalog client.
//!
//! Walks a cursor-paginated listing API (the YouTube Data API
//! `playlistItems` endpoint in production), keeps entries whose description
//! matches a program's filter, and produces both the full matching set and
//! a bounded newest-first subset.
//!
//! # Configuration
//!
//! ```toml
//! [catalog]
//! api_base = "https://www.googleapis.com/youtube/v3"
//! api_key_env = "YOUTUBE_API_KEY"
//! page_size = 50
//!
//! [programs.catalog]
//! collection_id = "UUzx1pweEHKhsIfPkQZbRH4w"
//! facet = "video"
//! description_contains = ["parsha"]
//! ```
//!
//! # Pagination
//!
//! The loop follows `nextPageToken` until the API stops returning one. The
//! full scan always runs to completion (its length is an authoritative
//! count); the recent subset is capped at the first N matches seen, since
//! the API lists newest first.
//!
//! # Failure
//!
//! A non-success status is fatal ([`PipelineError::CatalogStatus`]): no
//! other source can supply this program's authoritative count.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::config::{CatalogConfig, ProgramCatalogConfig, ProgramConfig};
use crate::dates;
use crate::error::PipelineError;
use crate::models::{title_or, Item, ItemId};
use crate::traits::Catalog;

/// One listing entry, reduced to the fields the pipeline reads.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub entry_id: String,
    pub title: Option<String>,
    pub published_at: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogPage {
    pub entries: Vec<CatalogEntry>,
    pub next_cursor: Option<String>,
}

/// Result of walking every page of a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogScan {
    /// Every matching entry, in API order.
    pub all: Vec<CatalogEntry>,
    /// The first `recent_limit` matching entries.
    pub recent: Vec<CatalogEntry>,
}

/// Case-insensitive "description contains any of" predicate.
#[derive(Debug, Clone, Default)]
pub struct DescriptionFilter {
    needles: Vec<String>,
}

impl DescriptionFilter {
    pub fn new(needles: &[String]) -> Self {
        Self {
            needles: needles
                .iter()
                .map(|n| n.trim().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    pub fn matches(&self, description: &str) -> bool {
        if self.needles.is_empty() {
            return true;
        }
        let haystack = description.to_lowercase();
        self.needles.iter().any(|n| haystack.contains(n.as_str()))
    }
}

/// Fetch one page and keep only the entries whose description matches.
pub async fn list_matching<C, P>(
    catalog: &C,
    collection_id: &str,
    predicate: P,
    cursor: Option<&str>,
) -> Result<CatalogPage>
where
    C: Catalog + ?Sized,
    P: Fn(&str) -> bool,
{
    let page = catalog.fetch_page(collection_id, cursor).await?;
    let fetched = page.entries.len();
    let entries: Vec<CatalogEntry> = page
        .entries
        .into_iter()
        .filter(|e| predicate(&e.description))
        .collect();
    debug!(
        collection = collection_id,
        fetched,
        matched = entries.len(),
        "catalog page"
    );
    Ok(CatalogPage {
        entries,
        next_cursor: page.next_cursor,
    })
}

/// Walk every page of `collection_id`, accumulating matches.
pub async fn scan_matching<C, P>(
    catalog: &C,
    collection_id: &str,
    predicate: P,
    recent_limit: usize,
) -> Result<CatalogScan>
where
    C: Catalog + ?Sized,
    P: Fn(&str) -> bool,
{
    let mut scan = CatalogScan::default();
    let mut seen_cursors: HashSet<String> = HashSet::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = list_matching(catalog, collection_id, &predicate, cursor.as_deref()).await?;
        pages += 1;

        for entry in page.entries {
            if scan.recent.len() < recent_limit {
                scan.recent.push(entry.clone());
            }
            scan.all.push(entry);
        }

        match page.next_cursor.filter(|c| !c.is_empty()) {
            Some(next) => {
                if !seen_cursors.insert(next.clone()) {
                    return Err(PipelineError::CatalogCursorLoop {
                        collection: collection_id.to_string(),
                        cursor: next,
                    }
                    .into());
                }
                cursor = Some(next);
            }
            None => break,
        }
    }

    info!(
        collection = collection_id,
        pages,
        matched = scan.all.len(),
        "catalog scan complete"
    );
    Ok(scan)
}

/// Turn catalog entries into items for `program`.
pub fn entries_to_items(
    program: &ProgramConfig,
    catalog: &ProgramCatalogConfig,
    entries: &[CatalogEntry],
) -> Vec<Item> {
    let fallback = program.default_title();
    entries
        .iter()
        .map(|e| Item {
            id: ItemId::new(&program.key, &e.entry_id),
            program: program.key.clone(),
            kind: program.kind,
            title: title_or(&[e.title.as_deref()], &fallback),
            url: Some(catalog.url_template.replace("{id}", &e.entry_id)),
            date: e.published_at.as_deref().and_then(dates::parse_published),
            page: program.page.clone(),
        })
        .collect()
}

// ============ Playlist API ============

/// [`Catalog`] over the YouTube Data API `playlistItems` endpoint.
pub struct PlaylistCatalog {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    page_size: u32,
}

impl PlaylistCatalog {
    pub fn new(config: &CatalogConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sitecounts/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            page_size: config.page_size,
        })
    }

    /// Build from config, failing before any request when the key is absent.
    pub fn from_env(config: &CatalogConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        Self::new(config, api_key)
    }
}

#[derive(Debug, Deserialize)]
struct PlaylistResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    #[serde(default)]
    snippet: Snippet,
}

#[derive(Debug, Default, Deserialize)]
struct Snippet {
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "publishedAt", default)]
    published_at: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "resourceId", default)]
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
struct ResourceId {
    #[serde(rename = "videoId", default)]
    video_id: Option<String>,
}

impl PlaylistResponse {
    fn into_page(self) -> CatalogPage {
        let entries = self
            .items
            .into_iter()
            .filter_map(|it| {
                let sn = it.snippet;
                let entry_id = sn.resource_id.and_then(|r| r.video_id)?;
                Some(CatalogEntry {
                    entry_id,
                    title: sn.title,
                    published_at: sn.published_at,
                    description: sn.description.unwrap_or_default(),
                })
            })
            .collect();
        CatalogPage {
            entries,
            next_cursor: self.next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

#[async_trait]
impl Catalog for PlaylistCatalog {
    async fn fetch_page(&self, collection_id: &str, cursor: Option<&str>) -> Result<CatalogPage> {
        let url = format!("{}/playlistItems", self.api_base);
        let page_size = self.page_size.to_string();

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("part", "snippet"),
                ("playlistId", collection_id),
                ("maxResults", page_size.as_str()),
                ("pageToken", cursor.unwrap_or("")),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("Failed to list catalog collection '{}'", collection_id))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::CatalogStatus {
                collection: collection_id.to_string(),
                status,
                body: body.chars().take(500).collect(),
            }
            .into());
        }

        let body: PlaylistResponse = resp
            .json()
            .await
            .with_context(|| format!("Malformed catalog response for '{}'", collection_id))?;
        Ok(body.into_page())
    }
}
