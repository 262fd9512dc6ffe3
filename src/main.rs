//! nestling daemon entry point.
//!
//! Loads nests, starts the rotation scheduler, the webhook flusher and the
//! HTTP server, and reloads on SIGHUP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use nestling::api;
use nestling::app_state::AppState;
use nestling::config::{AppConfig, DEFAULT_CONFIG_PATH};
use nestling::logging;
use nestling::persistence;
use nestling::service::{
    NestLoader, NestManager, NestRefresher, NoopSender, PoracleSender, RefreshMode, Reloader,
    WebhookSender,
};

/// Nest detection daemon.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Config file.
    #[arg(short = 'f', long = "config", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Force debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    logging::init(&config.logging, args.debug);
    tracing::info!(config = %args.config.display(), "starting nestling");

    let stores = persistence::connect(&config, true)
        .await
        .context("connecting to the stores")?;

    let cancel = CancellationToken::new();
    let (webhooks, poracle): (Arc<dyn WebhookSender>, Option<Arc<PoracleSender>>) =
        if config.webhooks.is_empty() {
            tracing::info!("WEBHOOK: no webhooks configured");
            (Arc::new(NoopSender), None)
        } else {
            let sender = Arc::new(
                PoracleSender::new(&config.webhook_settings, &config.webhooks)
                    .context("building webhook sender")?,
            );
            (Arc::clone(&sender) as Arc<dyn WebhookSender>, Some(sender))
        };

    let manager = Arc::new(NestManager::new(
        NestLoader::new(Arc::clone(&stores.nests), stores.points.clone()),
        webhooks,
    ));
    let reloader = Arc::new(Reloader::new(
        args.config.clone(),
        Arc::clone(&manager),
        NestRefresher::new(Arc::clone(&stores.nests), stores.points.clone()),
        cancel.clone(),
    ));
    let outcome = reloader
        .reload_with(&config, RefreshMode::None)
        .await
        .context("initial nest load")?;
    tracing::info!(nests = outcome.nests(), "nests loaded");

    let run_handle = {
        let manager = Arc::clone(&manager);
        let cancel = cancel.clone();
        tokio::spawn(async move { manager.run(cancel).await })
    };
    let flush_handle = poracle.map(|sender| {
        let cancel = cancel.clone();
        tokio::spawn(async move { sender.run(cancel).await })
    });

    let app = api::build_router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState::new(Arc::clone(&reloader)));
    let listener = tokio::net::TcpListener::bind(config.http.addr)
        .await
        .with_context(|| format!("binding {}", config.http.addr))?;
    tracing::info!(addr = %config.http.addr, "server listening");
    let server_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
        })
    };

    tokio::spawn(handle_signals(Arc::clone(&reloader), cancel.clone()));

    match run_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!("rotation scheduler failed: {err}"),
        Err(err) => tracing::error!("rotation scheduler panicked: {err}"),
    }
    // The scheduler only returns on its own when something went wrong.
    cancel.cancel();

    if let Some(handle) = flush_handle
        && let Err(err) = handle.await
    {
        tracing::error!("webhook flusher panicked: {err}");
    }
    server_handle
        .await
        .context("joining http server")?
        .context("http server")?;

    tracing::info!("nestling stopped");
    Ok(())
}

/// SIGHUP reloads; SIGINT or SIGTERM cancels.
#[cfg(unix)]
async fn handle_signals(reloader: Arc<Reloader>, cancel: CancellationToken) {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut hangup), Ok(mut interrupt), Ok(mut terminate)) = (
        signal(SignalKind::hangup()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        tracing::error!("installing signal handlers failed, stopping");
        cancel.cancel();
        return;
    };

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = hangup.recv() => {
                tracing::info!("SIGHUP received, reloading config");
                // Shutdown signals stay live while a reload runs.
                let reloader = Arc::clone(&reloader);
                tokio::spawn(async move {
                    match reloader.reload(RefreshMode::None).await {
                        Ok(outcome) => tracing::info!(nests = outcome.nests(), "config reloaded"),
                        Err(err) => tracing::error!("reload failed, keeping the running config: {err}"),
                    }
                });
            }
            _ = terminate.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                cancel.cancel();
                return;
            }
            _ = interrupt.recv() => {
                tracing::info!("SIGINT received, shutting down");
                cancel.cancel();
                return;
            }
        }
    }
}

/// Ctrl-C cancels.
#[cfg(not(unix))]
async fn handle_signals(_reloader: Arc<Reloader>, cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("interrupt received, shutting down");
    }
    cancel.cancel();
}
