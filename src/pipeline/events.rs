use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::cache::{EventCache, Freshness};
use crate::context::AppContext;
use crate::model::{
    ContactBatch, EventPointer, EventState, TimeRange, WindowAck, TIMESTAMP_FORMAT,
};
use crate::source::EventQuery;

use super::{abort, next, SharedRx};

/// Ship a batch downstream once this many contacts have pending pointers.
pub const CONTACT_BATCH_SIZE: usize = 30;

const THROTTLE_START: Duration = Duration::from_secs(10);
const THROTTLE_FLOOR: Duration = Duration::from_secs(1);

pub fn spawn_event_fetchers(
    ctx: Arc<AppContext>,
    rx: SharedRx<TimeRange>,
    batch_tx: mpsc::Sender<ContactBatch>,
    ack_tx: mpsc::Sender<WindowAck>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|_| {
            let ctx = ctx.clone();
            let rx = rx.clone();
            let batch_tx = batch_tx.clone();
            let ack_tx = ack_tx.clone();
            tokio::spawn(event_fetcher(ctx, rx, batch_tx, ack_tx))
        })
        .collect()
}

/// Drains time ranges: paginates the event listing, drops events whose
/// content digest is unchanged, groups fresh pointers by contact id and
/// ships batches downstream. `signal_done` ranges are acked with the
/// window span and event count, even if the window had to be skipped,
/// so the reverse ticker never stalls.
async fn event_fetcher(
    ctx: Arc<AppContext>,
    rx: SharedRx<TimeRange>,
    batch_tx: mpsc::Sender<ContactBatch>,
    ack_tx: mpsc::Sender<WindowAck>,
) {
    let mut throttle = THROTTLE_START;
    while let Some(range) = next(&rx).await {
        let from = range.from.format(TIMESTAMP_FORMAT).to_string();
        let to = range.to.format(TIMESTAMP_FORMAT).to_string();
        info!(%from, %to, "loading transaction events");

        let mut query = EventQuery {
            from: Some(from),
            to: Some(to),
            cursor: None,
        };
        let mut seen = 0u64;
        let mut batch: ContactBatch = HashMap::new();
        loop {
            let page = match ctx.source.fetch_events(&query).await {
                Ok(page) => page,
                Err(e) if e.is_fatal() => abort(e),
                Err(e) => {
                    warn!(error = %e, "skipping remainder of window");
                    break;
                }
            };
            seen += page.count;

            let mut fresh = 0usize;
            let mut duplicates = 0u64;
            for event in &page.results {
                let key = EventCache::key(&event.contact_id, &event.fired, &event.seqnr);
                let state = match ctx.event_cache.observe(key, &event.md5) {
                    Freshness::Duplicate => {
                        duplicates += 1;
                        continue;
                    }
                    Freshness::New => EventState::New,
                    Freshness::Updated => EventState::Updated,
                };
                let Some(pointer) = EventPointer::parse(&event.pointer, state) else {
                    warn!(contact_id = %event.contact_id, pointer = %event.pointer, "malformed event pointer");
                    continue;
                };
                fresh += 1;
                batch
                    .entry(event.contact_id.clone())
                    .or_default()
                    .push(pointer);
                if batch.len() >= CONTACT_BATCH_SIZE {
                    if batch_tx.send(std::mem::take(&mut batch)).await.is_err() {
                        return;
                    }
                }
            }
            ctx.stats.record_events(page.results.len() as u64, duplicates);
            metrics::counter!("events_deduplicated_total").increment(duplicates);

            // mostly-novel pages mean we are ploughing through a busy
            // window; pause so the source is not hammered
            if !page.results.is_empty() {
                if fresh * 4 > page.results.len() * 3 {
                    debug!(pause_ms = throttle.as_millis() as u64, "throttling busy window");
                    sleep(throttle).await;
                } else {
                    throttle = throttle.mul_f64(0.9).max(THROTTLE_FLOOR);
                }
            }

            match page.cursor.as_deref() {
                Some(cursor) if !cursor.is_empty() => query.cursor = Some(cursor.to_owned()),
                _ => break,
            }
        }
        if !batch.is_empty() && batch_tx.send(batch).await.is_err() {
            return;
        }
        if range.signal_done {
            let ack = WindowAck {
                span: range.span(),
                events: seen,
            };
            if ack_tx.send(ack).await.is_err() {
                return;
            }
        }
    }
}
