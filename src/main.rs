use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use activity_sync_worker::config::{Action, Cli, Config, SinkTarget};
use activity_sync_worker::context::AppContext;
use activity_sync_worker::pipeline;
use activity_sync_worker::sink::db::Upserter;
use activity_sync_worker::sink::webhook::WebhookSender;
use activity_sync_worker::source::{ActivitySource, HttpActivitySource};

/// Console logging, plus daily-rolled files when `--log-dir` is set. The
/// returned guard must stay alive so buffered file output is flushed.
fn setup_tracing(
    log_dir: Option<&std::path::Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let mut guard = None;
    let file_layer = log_dir.and_then(|dir| match std::fs::create_dir_all(dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(dir, "activity-sync.log");
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard = Some(file_guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(env_filter.clone()),
            )
        }
        Err(e) => {
            eprintln!("warning: failed to create log directory: {e}");
            None
        }
    });

    let console_layer = tracing_subscriber::fmt::layer().with_filter(env_filter);
    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();
    guard
}

/// Flips the shutdown flag on SIGINT/SIGTERM so the tickers stop emitting
/// and the stages drain.
fn spawn_signal_listener(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received, draining pipeline");
        let _ = shutdown_tx.send(true);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("installing SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Persists the resume point once per minute and logs a progress summary.
fn spawn_snapshotter(ctx: Arc<AppContext>, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = ctx.watermark.persist() {
                        warn!(error = %e, "failed to persist resume point");
                    }
                    ctx.stats.log_summary();
                }
                _ = shutdown.changed() => return,
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = setup_tracing(cli.log_dir.as_deref());
    let config = Config::from_cli(cli)?;
    info!(
        campaign = %config.campaign_id,
        action = ?config.action,
        workers = config.workers,
        "starting up"
    );

    let source = Arc::new(HttpActivitySource::new(
        config.api_base.clone(),
        config.campaign_id.clone(),
        config.campaign_token.clone(),
        config.listing_token.clone(),
        config.filters.clone(),
    )?);
    let ctx = Arc::new(AppContext::new(config, source));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_listener(shutdown_tx);
    spawn_snapshotter(ctx.clone(), shutdown_rx.clone());

    let start = ctx.config.resolve_start_date(ctx.watermark.get());

    let result = match (ctx.config.action, ctx.config.sink.clone()) {
        (Action::Webhook, SinkTarget::Webhook(url)) => {
            let sender = Arc::new(WebhookSender::new(url)?);
            pipeline::run_webhook(ctx.clone(), sender, start, shutdown_rx).await
        }
        (action, SinkTarget::Database(target)) => {
            let form = ctx
                .source
                .campaign_form()
                .await
                .context("fetching campaign descriptor")?;
            let upserter = Arc::new(
                Upserter::bootstrap(&target, ctx.config.db_connections as u32, &form)
                    .await
                    .context("preparing database schema")?,
            );
            match action {
                Action::DbInit => pipeline::run_db_init(ctx.clone(), upserter).await,
                Action::DbUpdate => {
                    let start = start.context("db_update requires a start date")?;
                    pipeline::run_db_update(ctx.clone(), upserter, start, shutdown_rx).await
                }
                Action::DbSync => {
                    pipeline::run_db_sync(ctx.clone(), upserter, start, shutdown_rx).await
                }
                Action::Webhook => unreachable!("webhook action never has a database sink"),
            }
        }
        (_, SinkTarget::Webhook(_)) => {
            unreachable!("database actions never have a webhook sink")
        }
    };

    if let Err(e) = ctx.watermark.persist() {
        error!(error = %e, "failed to persist resume point at teardown");
    }
    ctx.stats.log_summary();
    result
}
