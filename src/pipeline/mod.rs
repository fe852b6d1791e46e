use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::error;

use crate::context::AppContext;
use crate::error::SourceError;
use crate::sink::db::Upserter;
use crate::sink::webhook::WebhookSender;
use crate::sink::{spawn_upserters, spawn_webhook_senders};

pub mod contacts;
pub mod events;
pub mod split;
pub mod ticker;

/// Queue capacities between stages. Bounded, so a slow sink back-pressures
/// all the way up to the fetch stages instead of ballooning memory.
const RANGE_QUEUE: usize = 8;
const ACK_QUEUE: usize = 100;
const BATCH_QUEUE: usize = 64;
const CONTACT_QUEUE: usize = 256;
const ENTITY_QUEUE: usize = 1024;

/// A pool's shared input queue. Workers take turns waiting on it; closure
/// (every upstream sender dropped) is the drain-and-exit signal that
/// cascades the shutdown stage by stage.
pub type SharedRx<T> = Arc<Mutex<mpsc::Receiver<T>>>;

pub fn shared<T>(rx: mpsc::Receiver<T>) -> SharedRx<T> {
    Arc::new(Mutex::new(rx))
}

pub async fn next<T>(rx: &SharedRx<T>) -> Option<T> {
    rx.lock().await.recv().await
}

/// Credential failures cannot be retried; tear the process down so the
/// operator notices immediately.
pub(crate) fn abort(err: SourceError) -> ! {
    error!(error = %err, "fatal source error, exiting");
    std::process::exit(2);
}

async fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "pipeline worker panicked");
        }
    }
}

/// webhook mode: live windows (plus reverse replay down to `start`) fan
/// out through event and contact fetchers into the webhook sender pool.
/// Runs until the shutdown signal flips.
pub async fn run_webhook(
    ctx: Arc<AppContext>,
    sender: Arc<WebhookSender>,
    start: Option<DateTime<Utc>>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let workers = ctx.config.workers;
    let (range_tx, range_rx) = mpsc::channel(RANGE_QUEUE);
    let (ack_tx, ack_rx) = mpsc::channel(ACK_QUEUE);
    let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE);
    let (enriched_tx, enriched_rx) = mpsc::channel(CONTACT_QUEUE);

    let mut drivers = vec![tokio::spawn(ticker::forward_ticker(
        range_tx.clone(),
        shutdown.clone(),
    ))];
    match start {
        Some(start) => drivers.push(tokio::spawn(ticker::reverse_ticker(
            range_tx,
            ack_rx,
            start,
            shutdown.clone(),
        ))),
        None => drop(range_tx),
    }

    let fetchers =
        events::spawn_event_fetchers(ctx.clone(), shared(range_rx), batch_tx, ack_tx, workers);
    let contact_fetchers =
        contacts::spawn_contact_fetchers(ctx.clone(), shared(batch_rx), enriched_tx, workers);
    let senders = spawn_webhook_senders(ctx.clone(), sender, shared(enriched_rx), workers);

    join_all(drivers).await;
    join_all(fetchers).await;
    join_all(contact_fetchers).await;
    join_all(senders).await;
    Ok(())
}

/// db_init: list every contact id and import whole task-logs, then stop.
pub async fn run_db_init(ctx: Arc<AppContext>, upserter: Arc<Upserter>) -> anyhow::Result<()> {
    let workers = ctx.config.workers;
    let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE);
    let (enriched_tx, enriched_rx) = mpsc::channel(CONTACT_QUEUE);
    let (entity_tx, entity_rx) = mpsc::channel(ENTITY_QUEUE);

    let lister = contacts::spawn_contact_lister(ctx.clone(), batch_tx);
    let contact_fetchers =
        contacts::spawn_contact_fetchers(ctx.clone(), shared(batch_rx), enriched_tx, workers);
    let splitters = split::spawn_splitters(shared(enriched_rx), entity_tx, workers);
    let sinks = spawn_upserters(
        ctx.clone(),
        upserter,
        shared(entity_rx),
        ctx.config.db_connections,
    );

    join_all(vec![lister]).await;
    join_all(contact_fetchers).await;
    join_all(splitters).await;
    join_all(sinks).await;
    Ok(())
}

/// db_update: reverse replay down to `start`, then stop.
pub async fn run_db_update(
    ctx: Arc<AppContext>,
    upserter: Arc<Upserter>,
    start: DateTime<Utc>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    run_db_pipeline(ctx, upserter, false, Some(start), shutdown).await
}

/// db_sync: reverse replay down to `start` while following the live
/// stream; runs until the shutdown signal flips.
pub async fn run_db_sync(
    ctx: Arc<AppContext>,
    upserter: Arc<Upserter>,
    start: Option<DateTime<Utc>>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    run_db_pipeline(ctx, upserter, true, start, shutdown).await
}

async fn run_db_pipeline(
    ctx: Arc<AppContext>,
    upserter: Arc<Upserter>,
    live: bool,
    start: Option<DateTime<Utc>>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let workers = ctx.config.workers;
    let (range_tx, range_rx) = mpsc::channel(RANGE_QUEUE);
    let (ack_tx, ack_rx) = mpsc::channel(ACK_QUEUE);
    let (batch_tx, batch_rx) = mpsc::channel(BATCH_QUEUE);
    let (enriched_tx, enriched_rx) = mpsc::channel(CONTACT_QUEUE);
    let (entity_tx, entity_rx) = mpsc::channel(ENTITY_QUEUE);

    let mut drivers = Vec::new();
    if live {
        drivers.push(tokio::spawn(ticker::forward_ticker(
            range_tx.clone(),
            shutdown.clone(),
        )));
    }
    match start {
        Some(start) => drivers.push(tokio::spawn(ticker::reverse_ticker(
            range_tx,
            ack_rx,
            start,
            shutdown.clone(),
        ))),
        None => drop(range_tx),
    }

    let fetchers =
        events::spawn_event_fetchers(ctx.clone(), shared(range_rx), batch_tx, ack_tx, workers);
    let contact_fetchers =
        contacts::spawn_contact_fetchers(ctx.clone(), shared(batch_rx), enriched_tx, workers);
    let splitters = split::spawn_splitters(shared(enriched_rx), entity_tx, workers);
    let sinks = spawn_upserters(
        ctx.clone(),
        upserter,
        shared(entity_rx),
        ctx.config.db_connections,
    );

    join_all(drivers).await;
    join_all(fetchers).await;
    join_all(contact_fetchers).await;
    join_all(splitters).await;
    join_all(sinks).await;
    Ok(())
}
