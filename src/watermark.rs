use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Serialize, Deserialize)]
struct ResumeState {
    timestamp: String,
}

/// Process-wide resume point: the `fired` timestamp of the newest
/// successfully persisted transaction. Persisted once per minute and at
/// teardown; read back on the next startup as the default start date.
pub struct HighWaterMark {
    cell: Mutex<Option<String>>,
    path: PathBuf,
}

impl HighWaterMark {
    /// Loads the resume file for `campaign_id`, if one exists.
    pub fn load(state_dir: &Path, campaign_id: &str) -> Self {
        let path = state_dir.join(format!("{campaign_id}.json"));
        let initial = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<ResumeState>(&raw).ok())
            .map(|state| state.timestamp);
        match &initial {
            Some(ts) => info!(timestamp = %ts, "loaded resume point"),
            None => info!(path = %path.display(), "no resume file yet"),
        }
        Self {
            cell: Mutex::new(initial),
            path,
        }
    }

    pub fn get(&self) -> Option<String> {
        self.cell.lock().expect("watermark lock").clone()
    }

    /// Publishes a successfully persisted `fired` timestamp. Timestamps
    /// sort chronologically, so keeping the maximum makes the resume point
    /// non-decreasing even though sink workers report out of order.
    pub fn advance(&self, fired: &str) {
        let mut cell = self.cell.lock().expect("watermark lock");
        match cell.as_deref() {
            Some(current) if current >= fired => {}
            _ => *cell = Some(fired.to_owned()),
        }
    }

    /// Writes the resume file.
    pub fn persist(&self) -> anyhow::Result<()> {
        let Some(timestamp) = self.get() else {
            return Ok(());
        };
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating state directory {}", dir.display()))?;
        }
        let raw = serde_json::to_string(&ResumeState { timestamp })?;
        fs::write(&self.path, raw)
            .with_context(|| format!("writing resume file {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_never_regresses() {
        let dir = tempfile::tempdir().unwrap();
        let hwm = HighWaterMark::load(dir.path(), "camp");
        hwm.advance("2024-05-01T12:00:00");
        hwm.advance("2024-05-01T11:59:59");
        assert_eq!(hwm.get().as_deref(), Some("2024-05-01T12:00:00"));
        hwm.advance("2024-05-01T12:00:01");
        assert_eq!(hwm.get().as_deref(), Some("2024-05-01T12:00:01"));
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let hwm = HighWaterMark::load(dir.path(), "camp");
        assert_eq!(hwm.get(), None);
        hwm.advance("2024-05-01T12:00:00");
        hwm.persist().unwrap();

        let reloaded = HighWaterMark::load(dir.path(), "camp");
        assert_eq!(reloaded.get().as_deref(), Some("2024-05-01T12:00:00"));
        // a different campaign keeps its own resume file
        let other = HighWaterMark::load(dir.path(), "other");
        assert_eq!(other.get(), None);
    }

    #[test]
    fn persist_without_progress_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let hwm = HighWaterMark::load(dir.path(), "camp");
        hwm.persist().unwrap();
        assert!(!dir.path().join("camp.json").exists());
    }
}
