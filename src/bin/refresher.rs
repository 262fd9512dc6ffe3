//! Re-applies the store filters to every nest and prunes overlaps.

use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use nestling::config::{AppConfig, DEFAULT_CONFIG_PATH};
use nestling::logging;
use nestling::persistence;
use nestling::service::NestRefresher;

/// Refresh area, spawnpoint and overlap state of every stored nest.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Config file.
    #[arg(short = 'f', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Force debug logging.
    #[arg(long)]
    debug: bool,
    /// Re-query spawnpoint counts even when already known.
    #[arg(long)]
    spawnpoints_all: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    logging::init(&config.logging, args.debug);

    let stores = persistence::connect(&config, true)
        .await
        .context("connecting to the stores")?;
    if stores.points.is_none() && args.spawnpoints_all {
        tracing::warn!("DB-REFRESHER: --spawnpoints-all without [golbat_db], counts stay as stored");
    }
    let refresher = NestRefresher::new(stores.nests, stores.points);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("DB-REFRESHER: interrupted");
                cancel.cancel();
            }
        });
    }

    let report = refresher
        .refresh_all(&config.filters, args.spawnpoints_all, &cancel, Utc::now())
        .await
        .context("refreshing nests")?;
    tracing::info!(
        visited = report.visited,
        updated = report.updated,
        overlap_disabled = report.overlap_disabled,
        "DB-REFRESHER: done"
    );
    Ok(())
}
