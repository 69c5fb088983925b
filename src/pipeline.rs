//! Pipeline orchestration.
//!
//! ```text
//! start content server
//!   → launch renderer
//!   → per program: visit page, scan catalog, read data file
//!   → reconcile counts, rank items, build index
//!   → close renderer, stop server (every exit path)
//!   → write both artifacts (success only)
//! ```
//!
//! Everything runs on one logical thread: one page render or one catalog
//! request at a time, against a single browsing context. Recoverable
//! failures (a page that will not load, a missing data file) are logged
//! and leave the affected values unresolved. Fatal ones abort before
//! anything is written.

use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::artifacts::{write_artifacts, Artifacts, CountSummary, CountsDocument};
use crate::catalog::{entries_to_items, scan_matching, DescriptionFilter, PlaylistCatalog};
use crate::config::{Config, ItemsConfig, ProgramConfig, RenderEngine};
use crate::content_server::ContentServer;
use crate::datafile;
use crate::flatten::flatten;
use crate::models::Item;
use crate::recency::{build_index, build_recency, dedup};
use crate::reconcile::{reconcile, Observations, Observed, SourceKind};
use crate::render::{Readiness, Snapshot, SnapshotRequest};
use crate::render_static::StaticRenderer;
use crate::traits::{Catalog, PageRenderer};

/// Run the whole pipeline against `renderer` and `catalog` and return the
/// documents to publish. Writes nothing.
///
/// `catalog` may be `None` only when no program declares a catalog.
pub async fn run_pipeline(
    config: &Config,
    renderer: &mut dyn PageRenderer,
    catalog: Option<&dyn Catalog>,
    updated: NaiveDate,
) -> Result<Artifacts> {
    if config.needs_catalog() && catalog.is_none() {
        bail!("a program declares a catalog but no catalog client is available");
    }

    let mut observations = Observations::default();
    let mut items: BTreeMap<String, Vec<Item>> = BTreeMap::new();

    for program in &config.programs {
        let mut program_items = Vec::new();

        if let Some(snapshot) = visit_page(config, renderer, program).await {
            observations.fold_snapshot(&config.programs, program, &snapshot);
            program_items.extend(dataset_items(program, &snapshot));
        }

        if let (Some(cat), Some(client)) = (&program.catalog, catalog) {
            let filter = DescriptionFilter::new(&cat.description_contains);
            let scan = scan_matching(
                client,
                &cat.collection_id,
                |d| filter.matches(d),
                config.output.recent_per_program,
            )
            .await?;
            observations.record(
                &program.key,
                &cat.facet,
                SourceKind::Catalog,
                Observed::Count(scan.all.len() as u64),
            );
            program_items.extend(entries_to_items(program, cat, &scan.all));
        }

        if let Some(ItemsConfig::File { path, list_field }) = &program.items {
            match datafile::read_items(program, &config.site.root, path, list_field.as_deref()) {
                Ok(found) => program_items.extend(found),
                Err(e) => warn!(program = %program.key, error = %format!("{:#}", e), "skipping data file"),
            }
        }

        let program_items = dedup(program_items);
        debug!(program = %program.key, items = program_items.len(), "items collected");
        items.insert(program.key.clone(), program_items);
    }

    let breakdown = reconcile(&config.programs, &observations)?;
    let recency = build_recency(
        &items,
        config.output.recent_overall,
        config.output.recent_per_program,
    );
    let all: Vec<Item> = items.into_values().flatten().collect();
    let index = build_index(&all);

    let summary = CountSummary::new(breakdown, updated);
    info!(
        total = summary.total,
        unresolved = summary.breakdown.unresolved().len(),
        index_entries = index.len(),
        "pipeline complete"
    );

    Ok(Artifacts {
        counts: CountsDocument {
            all_shiurim: summary,
            recent: recency.overall,
            recent_by_program: recency.by_program,
        },
        index,
    })
}

/// Render a program's page. A page that fails to load is skipped.
async fn visit_page(
    config: &Config,
    renderer: &mut dyn PageRenderer,
    program: &ProgramConfig,
) -> Option<Snapshot> {
    let page = program.page.as_deref()?;
    let request = SnapshotRequest::for_program(program, &config.render);

    match renderer.render(page, &request).await {
        Ok(snapshot) => {
            match &snapshot.readiness {
                Readiness::Ready => debug!(page, "page ready"),
                Readiness::TimedOut => {
                    warn!(page, "readiness wait timed out, reading values anyway")
                }
                Readiness::Failed(reason) => {
                    warn!(page, reason = %reason, "readiness unknown, reading values anyway")
                }
            }
            Some(snapshot)
        }
        Err(e) => {
            warn!(page, engine = renderer.name(), error = %format!("{:#}", e), "skipping page");
            None
        }
    }
}

/// Items from the first dataset global the page actually exposed.
fn dataset_items(program: &ProgramConfig, snapshot: &Snapshot) -> Vec<Item> {
    let Some(ItemsConfig::Dataset { names }) = &program.items else {
        return Vec::new();
    };
    match names.iter().find_map(|n| snapshot.dataset(n)) {
        Some(tree) => flatten(program, tree),
        None => {
            warn!(program = %program.key, page = %snapshot.path, "no item dataset exposed");
            Vec::new()
        }
    }
}

/// Build and publish: the `sitecounts build` entry point.
///
/// With `dry_run`, returns the artifacts without writing them.
pub async fn run_build(config: &Config, dry_run: bool) -> Result<Artifacts> {
    // Missing credential is fatal before any server, browser or API call
    let catalog = if config.needs_catalog() {
        Some(PlaylistCatalog::from_env(&config.catalog)?)
    } else {
        None
    };

    let server = ContentServer::start(&config.site.root, config.site.port, &config.site.index).await?;
    let result = match launch_renderer(config, server.base_url()).await {
        Ok(mut renderer) => {
            let result = run_pipeline(
                config,
                renderer.as_mut(),
                catalog.as_ref().map(|c| c as &dyn Catalog),
                Utc::now().date_naive(),
            )
            .await;
            if let Err(e) = renderer.close().await {
                warn!(error = %format!("{:#}", e), "renderer did not close cleanly");
            }
            result
        }
        Err(e) => Err(e),
    };
    server.shutdown().await;

    let artifacts = result?;
    if !dry_run {
        write_artifacts(&config.output, &config.site.root, &artifacts)?;
    }
    Ok(artifacts)
}

async fn launch_renderer(config: &Config, base_url: String) -> Result<Box<dyn PageRenderer>> {
    match config.render.engine {
        RenderEngine::Static => Ok(Box::new(StaticRenderer::new(base_url)?)),
        #[cfg(feature = "chromium")]
        RenderEngine::Chromium => Ok(Box::new(
            crate::render_chromium::ChromiumRenderer::launch(base_url, &config.render).await?,
        )),
        #[cfg(not(feature = "chromium"))]
        RenderEngine::Chromium => {
            bail!("built without the `chromium` feature; set render.engine = \"static\"")
        }
    }
}

/// Serve the site until Ctrl-C: the `sitecounts serve` entry point.
pub async fn run_serve(config: &Config) -> Result<()> {
    let server = ContentServer::start(&config.site.root, config.site.port, &config.site.index).await?;
    println!("Serving {} on {}", config.site.root.display(), server.base_url());
    tokio::signal::ctrl_c().await?;
    info!("received Ctrl+C, shutting down");
    server.shutdown().await;
    Ok(())
}

/// Scan one program's catalog and print the matches: `sitecounts catalog`.
pub async fn run_catalog(config: &Config, program_key: &str, limit: usize) -> Result<()> {
    let Some(program) = config.program(program_key) else {
        bail!("Unknown program: '{}'", program_key);
    };
    let Some(cat) = &program.catalog else {
        bail!("Program '{}' has no catalog", program_key);
    };

    let client = PlaylistCatalog::from_env(&config.catalog)?;
    let filter = DescriptionFilter::new(&cat.description_contains);
    let scan = scan_matching(&client, &cat.collection_id, |d| filter.matches(d), limit).await?;

    println!("{} matching entries in {}", scan.all.len(), cat.collection_id);
    for item in entries_to_items(program, cat, &scan.recent) {
        let date = item
            .date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "----------".to_string());
        println!("  {}  {}  {}", date, item.id.key(), item.title);
    }
    Ok(())
}
