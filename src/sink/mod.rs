use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::context::AppContext;
use crate::model::{EnrichedContact, Entity, EntityKind};
use crate::pipeline::split::locate_transaction;
use crate::pipeline::{next, SharedRx};

pub mod db;
pub mod webhook;

use db::Upserter;
use webhook::WebhookSender;

/// Sink pool for database mode. On every stored transaction the `fired`
/// timestamp is published to the watermark. Upsert failures are counted
/// and logged, never retried here: the row is idempotent by `$id` and the
/// next overlapping window re-presents the event.
pub fn spawn_upserters(
    ctx: Arc<AppContext>,
    upserter: Arc<Upserter>,
    rx: SharedRx<Entity>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|_| {
            let ctx = ctx.clone();
            let upserter = upserter.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                while let Some(entity) = next(&rx).await {
                    match upserter.upsert(&entity).await {
                        Ok(()) => {
                            ctx.stats.record_stored(entity.kind);
                            metrics::counter!("rows_upserted_total", "kind" => entity.kind.label())
                                .increment(1);
                            if entity.kind == EntityKind::Transaction {
                                if let Some(fired) =
                                    entity.data.get("fired").and_then(Value::as_str)
                                {
                                    ctx.watermark.advance(fired);
                                }
                            }
                        }
                        Err(e) => {
                            ctx.stats.record_failed(entity.kind);
                            metrics::counter!("rows_failed_total", "kind" => entity.kind.label())
                                .increment(1);
                            error!(
                                kind = entity.kind.label(),
                                parent = entity.parent_id(),
                                error = %e,
                                "upsert failed"
                            );
                        }
                    }
                }
            })
        })
        .collect()
}

/// Sink pool for webhook mode: one POST per pending pointer, straight off
/// the enriched contact (no splitting into child entities).
pub fn spawn_webhook_senders(
    ctx: Arc<AppContext>,
    sender: Arc<WebhookSender>,
    rx: SharedRx<EnrichedContact>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|_| {
            let ctx = ctx.clone();
            let sender = sender.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                while let Some(mut enriched) = next(&rx).await {
                    let task_log = enriched
                        .contact
                        .remove("$task_log")
                        .unwrap_or_else(|| Value::Array(Vec::new()));
                    let contact_id = enriched
                        .contact
                        .get("$id")
                        .and_then(Value::as_str)
                        .unwrap_or("?")
                        .to_owned();
                    for pointer in &enriched.pointers {
                        let Some(transaction) = locate_transaction(&task_log, pointer) else {
                            warn!(contact_id = %contact_id, pointer = %pointer, "event pointer outside task-log, skipping");
                            continue;
                        };
                        match sender.send(&enriched.contact, transaction, pointer.state).await {
                            Ok(()) => {
                                ctx.stats.record_webhook(true);
                                metrics::counter!("webhooks_delivered_total").increment(1);
                                if let Some(fired) =
                                    transaction.get("fired").and_then(Value::as_str)
                                {
                                    ctx.watermark.advance(fired);
                                }
                            }
                            Err(e) => {
                                ctx.stats.record_webhook(false);
                                metrics::counter!("webhooks_failed_total").increment(1);
                                error!(contact_id = %contact_id, error = %e, "webhook delivery gave up");
                            }
                        }
                    }
                }
            })
        })
        .collect()
}
