//! Listing cache and last-run metadata, rewritten after every scan

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::json_file;
use crate::indexer::Listing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    /// First run: state recorded, notifications suppressed
    Baseline,
    FetchFailed,
    Skipped,
    Cancelled,
}

/// Summary of the last scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub found: usize,
    pub new: usize,
    pub notified: usize,
    pub first_run: bool,
    pub outcome: RunOutcome,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanState {
    pub last_run: Option<LastRun>,
    /// Ranked listings from the most recent successful fetch
    pub listings: Vec<Listing>,
}

/// File-backed [`ScanState`]
#[derive(Debug)]
pub struct ScanStateRepository {
    path: PathBuf,
}

impl ScanStateRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state; missing or unreadable state yields the default
    pub fn load(&self) -> ScanState {
        match json_file::read::<ScanState>(&self.path) {
            Ok(Some(state)) => state,
            Ok(None) => ScanState::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %format!("{:#}", e), "Scan state unreadable, ignoring");
                ScanState::default()
            }
        }
    }

    pub fn save(&self, state: &ScanState) -> Result<()> {
        json_file::write_atomic(&self.path, state)
            .with_context(|| format!("Failed to persist scan state to {}", self.path.display()))
    }

    /// Replace only the last-run record, keeping the cached listings
    pub fn save_last_run(&self, last_run: LastRun) -> Result<()> {
        let mut state = self.load();
        state.last_run = Some(last_run);
        self.save(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn last_run(outcome: RunOutcome) -> LastRun {
        let now = Utc::now();
        LastRun {
            started_at: now,
            finished_at: now,
            found: 3,
            new: 2,
            notified: 1,
            first_run: false,
            outcome,
            error: None,
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let repo = ScanStateRepository::new(dir.path().join("scan_state.json"));
        assert_eq!(repo.load(), ScanState::default());

        let state = ScanState {
            last_run: Some(last_run(RunOutcome::Completed)),
            listings: vec![Listing::new("Movie")],
        };
        repo.save(&state).unwrap();
        assert_eq!(repo.load(), state);
    }

    #[test]
    fn test_save_last_run_keeps_listings() {
        let dir = tempfile::tempdir().unwrap();
        let repo = ScanStateRepository::new(dir.path().join("scan_state.json"));
        repo.save(&ScanState {
            last_run: None,
            listings: vec![Listing::new("Cached")],
        })
        .unwrap();

        repo.save_last_run(last_run(RunOutcome::FetchFailed)).unwrap();

        let state = repo.load();
        assert_eq!(state.listings.len(), 1);
        assert_eq!(state.last_run.unwrap().outcome, RunOutcome::FetchFailed);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(last_run(RunOutcome::Baseline)).unwrap();
        assert_eq!(json["outcome"], "baseline");
        assert_eq!(json["firstRun"], false);
        assert!(json.get("startedAt").is_some());
    }
}
