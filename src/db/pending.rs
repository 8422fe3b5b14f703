//! Pending download requests awaiting operator approval

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::json_file;
use crate::services::upgrade_evaluator::ReasonCode;

pub const APPROVE_PREFIX: &str = "dl_yes_";
pub const DECLINE_PREFIX: &str = "dl_no_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    /// Approved and handed to the download client, result not yet known
    Submitting,
    Started,
    Declined,
    Failed,
    Expired,
}

impl PendingStatus {
    pub fn is_open(self) -> bool {
        self == PendingStatus::Pending
    }
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingStatus::Pending => write!(f, "pending"),
            PendingStatus::Submitting => write!(f, "submitting"),
            PendingStatus::Started => write!(f, "started"),
            PendingStatus::Declined => write!(f, "declined"),
            PendingStatus::Failed => write!(f, "failed"),
            PendingStatus::Expired => write!(f, "expired"),
        }
    }
}

/// A download offered to the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingDownload {
    pub request_id: String,
    pub title: String,
    pub year: Option<u16>,
    pub torrent_name: String,
    pub torrent_link: String,
    pub target_folder: String,
    /// Download client category, e.g. `movies-fel`
    pub category: String,
    pub current_quality: String,
    pub new_quality: String,
    pub reason: String,
    pub reason_code: ReasonCode,
    pub status: PendingStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Handle returned by the download client once started
    pub download_handle: Option<String>,
    pub error: Option<String>,
}

impl PendingDownload {
    pub fn approve_callback(&self) -> String {
        format!("{}{}", APPROVE_PREFIX, self.request_id)
    }

    pub fn decline_callback(&self) -> String {
        format!("{}{}", DECLINE_PREFIX, self.request_id)
    }

    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.created_at > max_age
    }

    /// Operator-facing approval prompt
    pub fn message(&self) -> String {
        let title = match self.year {
            Some(year) => format!("{} ({})", self.title, year),
            None => self.title.clone(),
        };
        // Only the last path component is useful to a human
        let folder = self
            .target_folder
            .rsplit(['/', '\\'])
            .find(|s| !s.is_empty())
            .unwrap_or(&self.target_folder);

        format!(
            "New version available!\n\nMovie: {}\n\nCurrent quality:\n{}\n\nNew quality:\n{}\n\nReason: {}\n\nFolder: {}\n\nDownload this version?",
            title, self.current_quality, self.new_quality, self.reason, folder
        )
    }
}

/// Result of [`PendingRepository::claim`]
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The request was open and now carries the requested status
    Claimed(PendingDownload),
    NotFound,
    /// The request was open but too old; it is now marked expired
    Expired,
    AlreadyResolved(PendingStatus),
}

/// File-backed store of [`PendingDownload`] keyed by request id.
///
/// The file is shared between the daemon and one-shot CLI invocations, so
/// every mutation re-reads it first and never writes back a stale copy.
#[derive(Debug)]
pub struct PendingRepository {
    path: PathBuf,
    records: BTreeMap<String, PendingDownload>,
}

impl PendingRepository {
    /// Load the store; missing or unreadable state starts empty
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = read_records(&path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %format!("{:#}", e), "Pending downloads unreadable, starting empty");
            BTreeMap::new()
        });
        Self { path, records }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pick up changes written by other processes.
    ///
    /// An unreadable file keeps the in-memory copy.
    pub fn refresh(&mut self) {
        match read_records(&self.path) {
            Ok(records) => self.records = records,
            Err(e) => {
                warn!(path = %self.path.display(), error = %format!("{:#}", e), "Pending downloads unreadable, keeping cached copy");
            }
        }
    }

    fn persist(&self) -> Result<()> {
        json_file::write_atomic(&self.path, &self.records)
            .with_context(|| format!("Failed to persist pending downloads to {}", self.path.display()))
    }

    pub fn insert(&mut self, record: PendingDownload) -> Result<()> {
        self.refresh();
        self.records.insert(record.request_id.clone(), record);
        self.persist()
    }

    pub fn get(&self, request_id: &str) -> Option<&PendingDownload> {
        self.records.get(request_id)
    }

    /// Open requests, oldest first
    pub fn list_open(&self) -> Vec<&PendingDownload> {
        let mut open: Vec<_> = self.records.values().filter(|r| r.status.is_open()).collect();
        open.sort_by_key(|r| r.created_at);
        open
    }

    /// Move an open request to `status` in one read-modify-write.
    ///
    /// Only one caller can claim a given request; later callers see
    /// [`Claim::AlreadyResolved`].
    pub fn claim(
        &mut self,
        request_id: &str,
        status: PendingStatus,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<Claim> {
        self.refresh();
        let Some(record) = self.records.get_mut(request_id) else {
            return Ok(Claim::NotFound);
        };
        if !record.status.is_open() {
            return Ok(Claim::AlreadyResolved(record.status));
        }

        let expired = record.is_expired(now, max_age);
        record.status = if expired { PendingStatus::Expired } else { status };
        record.resolved_at = Some(now);
        let claimed = record.clone();
        self.persist()?;

        Ok(if expired {
            Claim::Expired
        } else {
            Claim::Claimed(claimed)
        })
    }

    /// Set the final status of a request
    pub fn resolve(
        &mut self,
        request_id: &str,
        status: PendingStatus,
        download_handle: Option<String>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<PendingDownload>> {
        self.refresh();
        let Some(record) = self.records.get_mut(request_id) else {
            return Ok(None);
        };
        record.status = status;
        record.resolved_at = Some(now);
        record.download_handle = download_handle;
        record.error = error;
        let updated = record.clone();
        self.persist()?;
        Ok(Some(updated))
    }

    /// Mark open requests older than `max_age` expired. Returns how many changed.
    pub fn expire_older_than(&mut self, now: DateTime<Utc>, max_age: Duration) -> Result<usize> {
        self.refresh();
        let mut expired = 0;
        for record in self.records.values_mut() {
            if record.status.is_open() && record.is_expired(now, max_age) {
                record.status = PendingStatus::Expired;
                record.resolved_at = Some(now);
                expired += 1;
            }
        }
        if expired > 0 {
            self.persist()?;
            info!(expired, "Expired pending download requests");
        }
        Ok(expired)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn read_records(path: &Path) -> Result<BTreeMap<String, PendingDownload>> {
    Ok(json_file::read(path)?.unwrap_or_default())
}
