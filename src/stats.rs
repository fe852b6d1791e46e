use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::model::EntityKind;

fn slot(kind: EntityKind) -> usize {
    match kind {
        EntityKind::Contact => 0,
        EntityKind::Transaction => 1,
        EntityKind::Connection => 2,
        EntityKind::Recording => 3,
    }
}

/// Run-wide outcome tallies, logged by the periodic snapshotter and once
/// more at teardown.
#[derive(Default)]
pub struct StatsAggregator {
    events_seen: AtomicU64,
    events_skipped: AtomicU64,
    contacts_fetched: AtomicU64,
    stored: [AtomicU64; 4],
    failed: [AtomicU64; 4],
    webhooks_delivered: AtomicU64,
    webhooks_failed: AtomicU64,
}

impl StatsAggregator {
    pub fn record_events(&self, seen: u64, skipped: u64) {
        self.events_seen.fetch_add(seen, Ordering::Relaxed);
        self.events_skipped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn record_contacts(&self, fetched: u64) {
        self.contacts_fetched.fetch_add(fetched, Ordering::Relaxed);
    }

    pub fn record_stored(&self, kind: EntityKind) {
        self.stored[slot(kind)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, kind: EntityKind) {
        self.failed[slot(kind)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_webhook(&self, delivered: bool) {
        if delivered {
            self.webhooks_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.webhooks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stored_count(&self, kind: EntityKind) -> u64 {
        self.stored[slot(kind)].load(Ordering::Relaxed)
    }

    pub fn failed_count(&self, kind: EntityKind) -> u64 {
        self.failed[slot(kind)].load(Ordering::Relaxed)
    }

    pub fn log_summary(&self) {
        info!(
            events = self.events_seen.load(Ordering::Relaxed),
            deduplicated = self.events_skipped.load(Ordering::Relaxed),
            contacts_fetched = self.contacts_fetched.load(Ordering::Relaxed),
            contact_rows = self.stored_count(EntityKind::Contact),
            transaction_rows = self.stored_count(EntityKind::Transaction),
            connection_rows = self.stored_count(EntityKind::Connection),
            recording_rows = self.stored_count(EntityKind::Recording),
            rows_failed = self.failed.iter().map(|c| c.load(Ordering::Relaxed)).sum::<u64>(),
            webhooks_delivered = self.webhooks_delivered.load(Ordering::Relaxed),
            webhooks_failed = self.webhooks_failed.load(Ordering::Relaxed),
            "sync progress"
        );
    }
}
