//! # Site Counts
//!
//! Build-time statistics for a static Torah-learning site.
//!
//! Site Counts serves the site's own pages from a loopback HTTP server,
//! renders them headlessly so their scripts compute the values they show,
//! combines those values with a paginated video catalog and flat data files,
//! and publishes two JSON artifacts: per-program count breakdowns with the
//! most recent items, and a flat search index of every known item.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Content      │──▶│  Renderer    │──▶│ Reconciler  │──▶ site-counts.json
//! │ Server       │   │ chromium/    │   │ precedence  │
//! └──────────────┘   │ static       │   └─────────────┘
//!                    └──────────────┘          ▲
//! ┌──────────────┐   ┌──────────────┐          │
//! │ Catalog      │──▶│  Flattener / │──▶ Recency & Index ──▶ search-index.json
//! │ (playlist)   │   │  data files  │
//! └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export YOUTUBE_API_KEY=...
//! sitecounts build --dry-run      # print both documents
//! sitecounts build                # write them under the site root
//! sitecounts serve                # preview the site as the renderer sees it
//! sitecounts catalog parsha       # inspect one program's catalog matches
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Items, item identity, index entries |
//! | [`dates`] | Date parsing and canonical formatting |
//! | [`error`] | Fatal error taxonomy |
//! | [`content_server`] | Loopback static file server |
//! | [`traits`] | `PageRenderer` and `Catalog` extension seams |
//! | [`catalog`] | Paginated playlist client and scans |
//! | [`render`] | Snapshot model and readiness polling |
//! | `render_chromium` | Headless Chromium renderer (feature `chromium`) |
//! | [`render_static`] | Script-less HTML renderer |
//! | [`flatten`] | Category tree flattening |
//! | [`datafile`] | Flat per-program data files |
//! | [`reconcile`] | Count reconciliation and precedence |
//! | [`recency`] | Recent lists and the search index |
//! | [`artifacts`] | Atomic artifact writes |
//! | [`pipeline`] | Orchestration |

pub mod artifacts;
pub mod catalog;
pub mod config;
pub mod content_server;
pub mod datafile;
pub mod dates;
pub mod error;
pub mod flatten;
pub mod models;
pub mod pipeline;
pub mod recency;
pub mod reconcile;
pub mod render;
#[cfg(feature = "chromium")]
pub mod render_chromium;
pub mod render_static;
pub mod traits;
