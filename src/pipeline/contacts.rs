use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::context::AppContext;
use crate::model::{ContactBatch, EnrichedContact};

use super::{abort, next, SharedRx};

/// Page size of the contact-id listing.
pub const CONTACT_LIST_LIMIT: usize = 30;

pub fn spawn_contact_fetchers(
    ctx: Arc<AppContext>,
    rx: SharedRx<ContactBatch>,
    enriched_tx: mpsc::Sender<EnrichedContact>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|_| {
            let ctx = ctx.clone();
            let rx = rx.clone();
            let enriched_tx = enriched_tx.clone();
            tokio::spawn(contact_fetcher(ctx, rx, enriched_tx))
        })
        .collect()
}

/// Bulk-fetches the flat view of each batch's contacts and forwards one
/// enriched record per contact. A batch that still fails after the client
/// retries is dropped; its events were cached, so the next overlapping
/// window will re-present them.
async fn contact_fetcher(
    ctx: Arc<AppContext>,
    rx: SharedRx<ContactBatch>,
    enriched_tx: mpsc::Sender<EnrichedContact>,
) {
    while let Some(mut batch) = next(&rx).await {
        let ids: Vec<String> = batch.keys().cloned().collect();
        let contacts = match ctx.source.fetch_contacts(&ids).await {
            Ok(contacts) => contacts,
            Err(e) if e.is_fatal() => abort(e),
            Err(e) => {
                warn!(contacts = ids.len(), error = %e, "dropping contact batch");
                continue;
            }
        };
        ctx.stats.record_contacts(contacts.len() as u64);
        for contact in contacts {
            let Some(id) = contact
                .get("$id")
                .and_then(Value::as_str)
                .map(str::to_owned)
            else {
                warn!("contact document without $id, skipping");
                continue;
            };
            let pointers = batch.remove(&id).unwrap_or_default();
            let enriched = EnrichedContact { contact, pointers };
            if enriched_tx.send(enriched).await.is_err() {
                return;
            }
        }
    }
}

/// Init mode: streams every contact id in the campaign as batches with
/// empty pointer lists, which tells the splitter to import whole
/// task-logs.
pub fn spawn_contact_lister(
    ctx: Arc<AppContext>,
    batch_tx: mpsc::Sender<ContactBatch>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut cursor = String::new();
        loop {
            let page = match ctx
                .source
                .list_contact_ids(&cursor, CONTACT_LIST_LIMIT)
                .await
            {
                Ok(page) => page,
                Err(e) if e.is_fatal() => abort(e),
                Err(e) => {
                    warn!(error = %e, "contact listing aborted");
                    break;
                }
            };
            let mut batch = ContactBatch::new();
            for id in page.ids {
                cursor.clone_from(&id);
                batch.insert(id, Vec::new());
            }
            if !batch.is_empty() && batch_tx.send(batch).await.is_err() {
                return;
            }
            if page.exhausted {
                break;
            }
        }
        info!("contact listing complete");
    })
}
