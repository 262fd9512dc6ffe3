//! Imports nest polygons from a GeoJSON or path-list file into the nest
//! store.

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;

use nestling::config::{AppConfig, DEFAULT_CONFIG_PATH};
use nestling::logging;
use nestling::persistence;
use nestling::service::NestImporter;
use nestling::service::importer::parse_source;

/// Import nests into the nest store.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Config file.
    #[arg(short = 'f', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Force debug logging.
    #[arg(long)]
    debug: bool,
    /// Only report what would be written.
    #[arg(long)]
    dry_run: bool,
    /// GeoJSON FeatureCollection, or a `[{name, path}]` array.
    source: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    logging::init(&config.logging, args.debug);

    let text = tokio::fs::read_to_string(&args.source)
        .await
        .with_context(|| format!("reading {}", args.source.display()))?;
    let features = parse_source(&text)
        .with_context(|| format!("parsing {}", args.source.display()))?;
    tracing::info!(features = features.len(), source = %args.source.display(), "IMPORTER: source read");

    let stores = persistence::connect(&config, true)
        .await
        .context("connecting to the stores")?;
    let importer = NestImporter::new(stores.nests, config.importer.clone(), config.filters.clone());
    let report = importer.import(features, args.dry_run, Utc::now()).await;

    tracing::info!(
        features = report.features,
        invalid = report.invalid,
        unnamed = report.unnamed,
        missing_id = report.missing_id,
        area_filtered = report.area_filtered,
        contained = report.contained,
        created = report.created,
        updated = report.updated,
        failed = report.failed,
        dry_run = args.dry_run,
        "IMPORTER: done"
    );
    if report.failed > 0 {
        anyhow::bail!("{} nests could not be written", report.failed);
    }
    Ok(())
}
