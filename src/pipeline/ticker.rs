use std::time::Duration;

use chrono::{DateTime, Duration as Delta, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info};

use crate::model::{TimeRange, WindowAck};

/// One backfill window should yield roughly one page of events.
pub const TARGET_BATCH_SIZE: u32 = 1000;

/// Emits overlapping live windows forever: every minute the last minute,
/// every 20 minutes the last 20, every 12 hours the last 12. The overlap
/// is intentional; the event cache absorbs the duplicates and the wide
/// windows catch stragglers the narrow ones missed.
pub async fn forward_ticker(
    range_tx: mpsc::Sender<TimeRange>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut small = interval(Duration::from_secs(60));
    let mut medium = interval(Duration::from_secs(20 * 60));
    let mut large = interval(Duration::from_secs(12 * 3600));
    // intervals fire immediately once; swallow that so startup does not
    // triple-fetch the same instant
    small.tick().await;
    medium.tick().await;
    large.tick().await;

    loop {
        let width = tokio::select! {
            _ = small.tick() => Delta::minutes(1),
            _ = medium.tick() => Delta::minutes(20),
            _ = large.tick() => Delta::hours(12),
            _ = shutdown.changed() => return,
        };
        let now = Utc::now();
        let range = TimeRange {
            from: now - width,
            to: now,
            signal_done: false,
        };
        if range_tx.send(range).await.is_err() {
            return;
        }
    }
}

/// Replays history newest-first down to `start`, then terminates. Every
/// range demands an ack; the ack arrives before the next range is sized,
/// so adaptation always takes effect on the next emission.
pub async fn reverse_ticker(
    range_tx: mpsc::Sender<TimeRange>,
    mut ack_rx: mpsc::Receiver<WindowAck>,
    start: DateTime<Utc>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(start = %start, "replaying history down to start date");
    let mut width = Delta::minutes(1);
    let mut next_to = Utc::now();
    let mut next_from = next_to - width;

    loop {
        let last = next_from <= start;
        let range = TimeRange {
            from: if last { start } else { next_from },
            to: next_to,
            signal_done: true,
        };
        tokio::select! {
            sent = range_tx.send(range) => {
                if sent.is_err() {
                    return;
                }
            }
            _ = shutdown.changed() => return,
        }
        let ack = tokio::select! {
            ack = ack_rx.recv() => match ack {
                Some(ack) => ack,
                None => return,
            },
            _ = shutdown.changed() => return,
        };
        if last {
            break;
        }
        width = next_width(width, &ack);
        debug!(
            width_secs = width.num_seconds(),
            events = ack.events,
            "resized backfill window"
        );
        next_to = next_from;
        next_from = next_to - width;
    }
    info!("backfill complete");
}

/// Empty windows widen exponentially, capped at 12 hours, so stretches of
/// dead history are crossed quickly. Windows with events are sized so that
/// [`TARGET_BATCH_SIZE`] of them fit one window, clamped to [1 s, 60 s].
pub fn next_width(current: Delta, ack: &WindowAck) -> Delta {
    if ack.events == 0 {
        return std::cmp::min(current * 2, Delta::hours(12));
    }
    let per_target = ack.span.as_secs_f64() / ack.events as f64 * f64::from(TARGET_BATCH_SIZE);
    let clamped = per_target.clamp(1.0, 60.0);
    Delta::milliseconds((clamped * 1000.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(span_secs: u64, events: u64) -> WindowAck {
        WindowAck {
            span: Duration::from_secs(span_secs),
            events,
        }
    }

    #[test]
    fn empty_windows_double_up_to_a_ceiling() {
        let mut width = Delta::minutes(1);
        for expected_minutes in [2, 4, 8, 16] {
            width = next_width(width, &ack(width.num_seconds() as u64, 0));
            assert_eq!(width, Delta::minutes(expected_minutes));
        }
        let huge = next_width(Delta::hours(11), &ack(3600, 0));
        assert_eq!(huge, Delta::hours(12));
    }

    #[test]
    fn dense_windows_size_to_the_target_batch() {
        // 1000 events over 60 seconds: one page per minute already
        assert_eq!(next_width(Delta::minutes(1), &ack(60, 1000)), Delta::seconds(60));
        // denser traffic shrinks the window
        assert_eq!(next_width(Delta::minutes(1), &ack(60, 4000)), Delta::seconds(15));
    }

    #[test]
    fn adaptive_width_clamps_to_bounds() {
        // extremely dense: clamp up to one second
        assert_eq!(next_width(Delta::minutes(1), &ack(60, 1_000_000)), Delta::seconds(1));
        // extremely sparse but non-empty: clamp down to one minute
        assert_eq!(next_width(Delta::minutes(1), &ack(3600, 1)), Delta::seconds(60));
    }
}
