use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// The source's timestamp format. Lexicographic order is chronological
/// order, which the watermark and the dedup keys rely on.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One fetch window. `signal_done` requests an ack on the window-ack
/// channel once a fetcher has drained the range.
#[derive(Debug, Clone, Copy)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub signal_done: bool,
}

impl TimeRange {
    pub fn span(&self) -> Duration {
        (self.to - self.from).to_std().unwrap_or_default()
    }
}

/// Ack emitted by an EventFetcher for a `signal_done` range.
#[derive(Debug, Clone, Copy)]
pub struct WindowAck {
    pub span: Duration,
    pub events: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    New,
    Updated,
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventState::New => f.write_str("new"),
            EventState::Updated => f.write_str("updated"),
        }
    }
}

/// Locates one transaction inside a contact's task-log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPointer {
    pub task_log_index: usize,
    pub transaction_index: usize,
    pub state: EventState,
}

impl EventPointer {
    /// Parses the source's `"tl,ta"` pointer encoding.
    pub fn parse(raw: &str, state: EventState) -> Option<Self> {
        let (tl, ta) = raw.split_once(',')?;
        Some(Self {
            task_log_index: tl.trim().parse().ok()?,
            transaction_index: ta.trim().parse().ok()?,
            state,
        })
    }
}

impl fmt::Display for EventPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{}",
            self.task_log_index, self.transaction_index, self.state
        )
    }
}

/// Pending pointers grouped by contact id. An empty pointer list means the
/// contact's whole task-log is to be imported (init mode).
pub type ContactBatch = HashMap<String, Vec<EventPointer>>;

/// A flat contact document joined with the pointers that caused its fetch.
#[derive(Debug, Clone)]
pub struct EnrichedContact {
    pub contact: Map<String, Value>,
    pub pointers: Vec<EventPointer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Contact,
    Transaction,
    Connection,
    Recording,
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Contact => "df_contacts",
            EntityKind::Transaction => "df_transactions",
            EntityKind::Connection => "df_connections",
            EntityKind::Recording => "df_recordings",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Contact => "contact",
            EntityKind::Transaction => "transaction",
            EntityKind::Connection => "connection",
            EntityKind::Recording => "recording",
        }
    }

    /// Column identifying the row's parent, for error logs.
    pub fn parent_key(&self) -> &'static str {
        match self {
            EntityKind::Contact => "$id",
            EntityKind::Transaction => "$contact_id",
            EntityKind::Connection => "$transaction_id",
            EntityKind::Recording => "$connection_id",
        }
    }
}

/// One denormalized row on its way to a sink.
#[derive(Debug, Clone)]
pub struct Entity {
    pub kind: EntityKind,
    pub data: Map<String, Value>,
}

impl Entity {
    pub fn parent_id(&self) -> &str {
        self.data
            .get(self.kind.parent_key())
            .and_then(Value::as_str)
            .unwrap_or("?")
    }
}

/// Deterministic 128-bit surrogate key: lowercase hex MD5 of the
/// concatenated parts. Stable across platforms and runs.
pub fn surrogate_id(parts: &[&str]) -> String {
    let mut ctx = md5::Context::new();
    for part in parts {
        ctx.consume(part.as_bytes());
    }
    format!("{:x}", ctx.compute())
}
