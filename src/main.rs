//! # Site Counts CLI (`sitecounts`)
//!
//! ## Usage
//!
//! ```bash
//! sitecounts --config ./config/sitecounts.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sitecounts build` | Run the pipeline and write both artifacts |
//! | `sitecounts build --dry-run` | Run the pipeline and print both artifacts |
//! | `sitecounts serve` | Serve the site root until Ctrl-C |
//! | `sitecounts catalog <program>` | Print one program's catalog matches |
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` filter);
//! stdout carries only command output.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use site_counts::{config, pipeline};

/// Site Counts: build-time statistics and search index for a static site.
#[derive(Parser)]
#[command(
    name = "sitecounts",
    about = "Site Counts: build-time statistics and search index for a static site",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sitecounts.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render every program page, reconcile counts and publish the artifacts.
    ///
    /// Nothing is written unless the whole run succeeds.
    Build {
        /// Print both documents to stdout instead of writing them.
        #[arg(long)]
        dry_run: bool,
    },

    /// Serve the site root on loopback until Ctrl-C.
    Serve,

    /// Scan one program's catalog and print the matching entries.
    Catalog {
        /// Program key from `[[programs]]`.
        program: String,

        /// Number of most recent matches to print.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build { dry_run } => {
            let artifacts = pipeline::run_build(&cfg, dry_run).await?;
            if dry_run {
                let (counts, index) = artifacts.to_json()?;
                println!("{}", counts);
                println!("{}", index);
            } else {
                println!(
                    "Wrote {} and {}",
                    cfg.site.root.join(&cfg.output.counts).display(),
                    cfg.site.root.join(&cfg.output.search_index).display()
                );
            }
        }
        Commands::Serve => {
            pipeline::run_serve(&cfg).await?;
        }
        Commands::Catalog { program, limit } => {
            pipeline::run_catalog(&cfg, &program, limit).await?;
        }
    }

    Ok(())
}
