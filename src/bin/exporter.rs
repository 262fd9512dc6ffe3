//! Writes stored nests as one GeoJSON FeatureCollection to stdout.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use nestling::config::{AppConfig, DEFAULT_CONFIG_PATH};
use nestling::domain::NestId;
use nestling::logging;
use nestling::persistence;
use nestling::service::{ExportSelection, export_nests};

/// Export nests from the nest store as GeoJSON.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Config file.
    #[arg(short = 'f', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Force debug logging.
    #[arg(long)]
    debug: bool,
    /// Export every area.
    #[arg(long)]
    all_areas: bool,
    /// Export nests of this area; repeatable.
    #[arg(long = "area", value_name = "NAME")]
    areas: Vec<String>,
    /// Export this nest; repeatable.
    #[arg(long = "nest-id", value_name = "ID")]
    nest_ids: Vec<i64>,
    /// Include inactive nests.
    #[arg(long)]
    include_inactive: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    logging::init(&config.logging, args.debug);

    let selection = ExportSelection {
        all_areas: args.all_areas,
        areas: args.areas,
        nest_ids: args.nest_ids.into_iter().map(NestId::new).collect(),
        include_inactive: args.include_inactive,
    };
    selection.validate().context("invalid selection")?;

    let stores = persistence::connect(&config, false)
        .await
        .context("connecting to the stores")?;
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let (collection, report) = export_nests(&*stores.nests, &selection, &cancel)
        .await
        .context("exporting nests")?;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &collection).context("writing GeoJSON")?;
    writeln!(stdout).context("writing GeoJSON")?;

    tracing::info!(
        scanned = report.scanned,
        exported = report.exported,
        invalid = report.invalid,
        "EXPORTER: done"
    );
    Ok(())
}
