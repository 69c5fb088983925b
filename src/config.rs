//! TOML configuration parsing and validation.
//!
//! # Example
//!
//! ```toml
//! [site]
//! root = "."
//! port = 4173
//!
//! [render]
//! engine = "chromium"
//! ready_timeout_ms = 8000
//!
//! [catalog]
//! api_key_env = "YOUTUBE_API_KEY"
//!
//! [[programs]]
//! key = "parsha"
//! kind = "video"
//! page = "/parsha.html"
//! ready = "window.SITE_COUNTS?.allShiurim?.breakdown?.parsha?.video != null"
//!
//! [[programs.facets]]
//! name = "audio"
//!
//! [[programs.facets]]
//! name = "video"
//!
//! [programs.catalog]
//! collection_id = "UUzx1pweEHKhsIfPkQZbRH4w"
//! facet = "video"
//!
//! [[programs]]
//! key = "halacha"
//! kind = "audio"
//! page = "/halacha.html"
//!
//! [[programs.facets]]
//! name = "totalAll"
//! dom = { selector = "#halachaTotalAll", attribute = "data-total" }
//!
//! [programs.items]
//! source = "dataset"
//! names = ["HALACHA_DATA", "PAGE_DATA"]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::models::Kind;
use crate::reconcile::{PrecedencePolicy, SourceKind};
use crate::render::DomProbe;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub site: SiteConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub programs: Vec<ProgramConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    /// Directory served by the content server.
    pub root: PathBuf,
    /// Loopback port; `0` picks an ephemeral one.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Document served for `GET /`.
    #[serde(default = "default_index")]
    pub index: String,
}

fn default_port() -> u16 {
    4173
}
fn default_index() -> String {
    "index.html".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RenderEngine {
    /// Headless Chromium; runs page scripts.
    Chromium,
    /// Plain HTTP fetch + HTML parse; reads DOM attributes and JSON
    /// `<script>` blocks only.
    Static,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_engine")]
    pub engine: RenderEngine,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Dotted path of the globally exposed breakdown object.
    #[serde(default = "default_breakdown_global")]
    pub breakdown_global: Option<String>,
    /// Chromium sandbox; containers running as root usually need `false`.
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            ready_timeout_ms: default_ready_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            breakdown_global: default_breakdown_global(),
            sandbox: default_sandbox(),
        }
    }
}

fn default_engine() -> RenderEngine {
    RenderEngine::Chromium
}
fn default_ready_timeout_ms() -> u64 {
    8000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_breakdown_global() -> Option<String> {
    Some("SITE_COUNTS.allShiurim.breakdown".to_string())
}
fn default_sandbox() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            page_size: default_page_size(),
        }
    }
}

fn default_api_base() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}
fn default_api_key_env() -> String {
    "YOUTUBE_API_KEY".to_string()
}
fn default_page_size() -> u32 {
    50
}

impl CatalogConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> std::result::Result<String, PipelineError> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(PipelineError::MissingCredential {
                var: self.api_key_env.clone(),
            }),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_counts_path")]
    pub counts: PathBuf,
    #[serde(default = "default_search_index_path")]
    pub search_index: PathBuf,
    #[serde(default = "default_recent_overall")]
    pub recent_overall: usize,
    #[serde(default = "default_recent_per_program")]
    pub recent_per_program: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            counts: default_counts_path(),
            search_index: default_search_index_path(),
            recent_overall: default_recent_overall(),
            recent_per_program: default_recent_per_program(),
        }
    }
}

fn default_counts_path() -> PathBuf {
    PathBuf::from("data/site-counts.json")
}
fn default_search_index_path() -> PathBuf {
    PathBuf::from("data/search-index.json")
}
fn default_recent_overall() -> usize {
    5
}
fn default_recent_per_program() -> usize {
    10
}

/// One content stream (weekly parsha, halacha, one-minute audio, ...).
#[derive(Debug, Deserialize, Clone)]
pub struct ProgramConfig {
    pub key: String,
    pub kind: Kind,
    /// Site path of the program's page, if it has one.
    #[serde(default)]
    pub page: Option<String>,
    /// Readiness predicate evaluated in the page after load.
    #[serde(default)]
    pub ready: Option<String>,
    /// Key of this program inside the exposed breakdown object.
    #[serde(default)]
    pub breakdown_key: Option<String>,
    #[serde(default)]
    pub default_title: Option<String>,
    #[serde(default)]
    pub facets: Vec<FacetConfig>,
    #[serde(default)]
    pub catalog: Option<ProgramCatalogConfig>,
    #[serde(default)]
    pub items: Option<ItemsConfig>,
}

impl ProgramConfig {
    pub fn breakdown_key(&self) -> &str {
        self.breakdown_key.as_deref().unwrap_or(&self.key)
    }

    pub fn default_title(&self) -> String {
        self.default_title
            .clone()
            .unwrap_or_else(|| format!("{} shiur", self.key))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FacetConfig {
    pub name: String,
    #[serde(default)]
    pub dom: Option<DomProbe>,
    /// Dotted global path to a scalar count (e.g. `TM_COUNTS.total_items`).
    #[serde(default)]
    pub dataset: Option<String>,
    /// Abort the run when no source resolves this facet.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub precedence: Option<Vec<SourceKind>>,
}

impl FacetConfig {
    pub fn policy(&self) -> PrecedencePolicy {
        match &self.precedence {
            Some(order) => PrecedencePolicy::new(order.clone()),
            None => PrecedencePolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProgramCatalogConfig {
    pub collection_id: String,
    /// Facet whose authoritative value is the full-scan length.
    pub facet: String,
    /// Keep entries whose description contains any of these
    /// (case-insensitive). Empty keeps everything.
    #[serde(default)]
    pub description_contains: Vec<String>,
    /// `{id}` is replaced with the entry id.
    #[serde(default = "default_url_template")]
    pub url_template: String,
}

fn default_url_template() -> String {
    "https://www.youtube.com/watch?v={id}".to_string()
}

/// Where a program's searchable items come from, besides its catalog.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum ItemsConfig {
    /// Category tree exposed by the page; first present global wins.
    Dataset { names: Vec<String> },
    /// Flat data file under the site root.
    File {
        path: PathBuf,
        #[serde(default)]
        list_field: Option<String>,
    },
}

impl Config {
    pub fn program(&self, key: &str) -> Option<&ProgramConfig> {
        self.programs.iter().find(|p| p.key == key)
    }

    pub fn needs_catalog(&self) -> bool {
        self.programs.iter().any(|p| p.catalog.is_some())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config = parse_config(&content)?;

    // Relative roots resolve against the config file's directory
    if config.site.root.is_relative() {
        if let Some(dir) = path.parent() {
            config.site.root = dir.join(&config.site.root);
        }
    }

    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.render.ready_timeout_ms == 0 {
        bail!("render.ready_timeout_ms must be > 0");
    }
    if config.render.poll_interval_ms == 0 {
        bail!("render.poll_interval_ms must be > 0");
    }
    if !(1..=50).contains(&config.catalog.page_size) {
        bail!("catalog.page_size must be in [1, 50]");
    }
    if config.output.recent_overall == 0 || config.output.recent_per_program == 0 {
        bail!("output.recent_overall and output.recent_per_program must be >= 1");
    }

    let mut keys = HashSet::new();
    for program in &config.programs {
        if program.key.trim().is_empty() {
            bail!("program key must not be empty");
        }
        if !keys.insert(program.key.as_str()) {
            bail!("duplicate program key: '{}'", program.key);
        }
        if let Some(page) = &program.page {
            if !page.starts_with('/') {
                bail!("program '{}': page must start with '/': {}", program.key, page);
            }
        }

        let mut facets = HashSet::new();
        for facet in &program.facets {
            if !facets.insert(facet.name.as_str()) {
                bail!("program '{}': duplicate facet '{}'", program.key, facet.name);
            }
            if let Some(order) = &facet.precedence {
                if order.is_empty() {
                    bail!(
                        "program '{}': facet '{}' has an empty precedence list",
                        program.key,
                        facet.name
                    );
                }
            }
            if (facet.dom.is_some() || facet.dataset.is_some()) && program.page.is_none() {
                bail!(
                    "program '{}': facet '{}' reads page values but the program has no page",
                    program.key,
                    facet.name
                );
            }
        }

        if let Some(catalog) = &program.catalog {
            if catalog.collection_id.trim().is_empty() {
                bail!("program '{}': catalog.collection_id must not be empty", program.key);
            }
            if !facets.contains(catalog.facet.as_str()) {
                bail!(
                    "program '{}': catalog facet '{}' is not a declared facet",
                    program.key,
                    catalog.facet
                );
            }
        }

        if let Some(ItemsConfig::Dataset { names }) = &program.items {
            if names.is_empty() {
                bail!("program '{}': items.names must not be empty", program.key);
            }
            if program.page.is_none() {
                bail!(
                    "program '{}': dataset items need a page to read them from",
                    program.key
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r##"
[site]
root = "site"

[[programs]]
key = "halacha"
kind = "audio"
page = "/halacha.html"

[[programs.facets]]
name = "totalAll"
dom = { selector = "#halachaTotalAll", attribute = "data-total" }

[programs.items]
source = "dataset"
names = ["HALACHA_DATA", "PAGE_DATA"]
"##;

    #[test]
    fn test_defaults_applied() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.site.port, 4173);
        assert_eq!(config.site.index, "index.html");
        assert_eq!(config.render.engine, RenderEngine::Chromium);
        assert_eq!(config.catalog.page_size, 50);
        assert_eq!(config.output.recent_overall, 5);
        assert_eq!(config.output.recent_per_program, 10);
        assert!(!config.needs_catalog());

        let program = config.program("halacha").unwrap();
        assert_eq!(program.breakdown_key(), "halacha");
        let probe = program.facets[0].dom.as_ref().unwrap();
        assert_eq!(probe.attribute, "data-total");
        assert!(matches!(program.items, Some(ItemsConfig::Dataset { .. })));
    }

    #[test]
    fn test_rejects_duplicate_program() {
        let toml = r#"
[site]
root = "."
[[programs]]
key = "a"
kind = "audio"
[[programs]]
key = "a"
kind = "video"
"#;
        let err = parse_config(toml).unwrap_err();
        assert!(err.to_string().contains("duplicate program key"));
    }

    #[test]
    fn test_rejects_undeclared_catalog_facet() {
        let toml = r#"
[site]
root = "."
[[programs]]
key = "parsha"
kind = "video"
[programs.catalog]
collection_id = "UU123"
facet = "video"
"#;
        let err = parse_config(toml).unwrap_err();
        assert!(err.to_string().contains("not a declared facet"));
    }

    #[test]
    fn test_rejects_oversized_page() {
        let toml = r#"
[site]
root = "."
[catalog]
page_size = 51
"#;
        assert!(parse_config(toml).is_err());
    }

    #[test]
    fn test_precedence_parses() {
        let toml = r#"
[site]
root = "."
[[programs]]
key = "tefila"
kind = "video"
page = "/tefilah.html"
[[programs.facets]]
name = "video"
precedence = ["breakdown", "dom"]
required = true
"#;
        let config = parse_config(toml).unwrap();
        let facet = &config.programs[0].facets[0];
        assert!(facet.required);
        assert_eq!(
            facet.policy().order(),
            &[SourceKind::Breakdown, SourceKind::Dom]
        );
    }

    #[test]
    fn test_missing_credential() {
        let catalog = CatalogConfig {
            api_key_env: "SITE_COUNTS_TEST_UNSET_KEY".to_string(),
            ..CatalogConfig::default()
        };
        let err = catalog.api_key().unwrap_err();
        assert!(matches!(err, PipelineError::MissingCredential { .. }));
    }
}
