//! Approve/decline workflow for upgrade downloads
//!
//! Every notify-worthy upgrade with a torrent link becomes a
//! [`PendingDownload`]. The operator answers through the notification
//! channel's callback (`dl_yes_<id>` / `dl_no_<id>`) or the CLI, and
//! [`ApprovalDesk::resolve`] maps the answer back to the request.

use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::db::pending::{
    APPROVE_PREFIX, Claim, DECLINE_PREFIX, PendingDownload, PendingRepository, PendingStatus,
};
use crate::indexer::Listing;
use crate::services::downloads::{DownloadExecutor, DownloadSubmission, category_for};
use crate::services::fingerprint::hash_string;
use crate::services::library::LibraryMatch;
use crate::services::logging::ActivityLog;
use crate::services::notifications::NotificationChannel;
use crate::services::upgrade_evaluator::Decision;
use crate::torrent::quality::QualityProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalAction {
    Approve,
    Decline,
}

impl ApprovalAction {
    /// Parse channel callback data into an action and request id
    pub fn parse_callback(data: &str) -> Option<(Self, &str)> {
        let (action, id) = if let Some(id) = data.strip_prefix(APPROVE_PREFIX) {
            (ApprovalAction::Approve, id)
        } else if let Some(id) = data.strip_prefix(DECLINE_PREFIX) {
            (ApprovalAction::Decline, id)
        } else {
            return None;
        };
        if id.is_empty() {
            return None;
        }
        Some((action, id))
    }
}

/// How a resolve attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Started { handle: Option<String> },
    Declined,
    Failed(String),
    NotFound,
    Expired,
    AlreadyResolved(PendingStatus),
}

/// Opens, tracks and resolves download approval requests
pub struct ApprovalDesk {
    pending: Mutex<PendingRepository>,
    executor: Arc<dyn DownloadExecutor>,
    channel: Arc<dyn NotificationChannel>,
    activity: ActivityLog,
    max_age: Duration,
    default_folder: Option<String>,
}

impl ApprovalDesk {
    pub fn new(
        pending: PendingRepository,
        executor: Arc<dyn DownloadExecutor>,
        channel: Arc<dyn NotificationChannel>,
        activity: ActivityLog,
        max_age: Duration,
        default_folder: Option<String>,
    ) -> Self {
        Self {
            pending: Mutex::new(pending),
            executor,
            channel,
            activity,
            max_age,
            default_folder,
        }
    }

    /// Open a request for a notify-worthy listing and announce it.
    ///
    /// Returns `None` when the listing has no torrent link or no target folder
    /// can be determined. A failed announcement keeps the request open so it
    /// can still be resolved from the CLI.
    pub async fn open_request(
        &self,
        listing: &Listing,
        decision: &Decision,
        candidate: &QualityProfile,
        library: Option<&LibraryMatch>,
        now: DateTime<Utc>,
    ) -> Result<Option<PendingDownload>> {
        let Some(torrent_link) = listing.download_link.clone() else {
            return Ok(None);
        };
        let Some(target_folder) = library
            .and_then(|m| m.folder.clone())
            .or_else(|| self.default_folder.clone())
        else {
            warn!(torrent = %listing.name, "No target folder for upgrade, skipping approval request");
            return Ok(None);
        };

        let title = library
            .map(|m| m.title.clone())
            .unwrap_or_else(|| listing.name.clone());
        let request_id = request_id(&title, &torrent_link, now);

        let record = PendingDownload {
            request_id: request_id.clone(),
            title,
            year: library.and_then(|m| m.year),
            torrent_name: listing.name.clone(),
            torrent_link,
            target_folder,
            category: category_for(candidate).to_string(),
            current_quality: library
                .map(|m| m.profile.summary())
                .unwrap_or_else(|| "Not in library".to_string()),
            new_quality: candidate.summary(),
            reason: decision.reason_text.clone(),
            reason_code: decision.reason_code,
            status: PendingStatus::Pending,
            created_at: now,
            resolved_at: None,
            download_handle: None,
            error: None,
        };

        self.pending.lock().insert(record.clone())?;

        if let Err(e) = self.channel.send_approval_request(&record).await {
            warn!(request_id = %request_id, error = %format!("{:#}", e), "Failed to send approval request");
        }
        self.activity.record(
            "approval",
            format!("Approval requested for {} ({})", record.title, record.reason),
        );
        info!(request_id = %request_id, title = %record.title, "Approval request opened");

        Ok(Some(record))
    }

    /// Apply an operator answer to a request
    pub async fn resolve(
        &self,
        request_id: &str,
        action: ApprovalAction,
        now: DateTime<Utc>,
    ) -> Result<ApprovalOutcome> {
        let target = match action {
            ApprovalAction::Approve => PendingStatus::Submitting,
            ApprovalAction::Decline => PendingStatus::Declined,
        };
        // Claim under the lock so a concurrent answer cannot submit twice
        let claim = self
            .pending
            .lock()
            .claim(request_id, target, now, self.max_age)?;
        let record = match claim {
            Claim::Claimed(record) => record,
            Claim::NotFound => return Ok(ApprovalOutcome::NotFound),
            Claim::Expired => return Ok(ApprovalOutcome::Expired),
            Claim::AlreadyResolved(status) => return Ok(ApprovalOutcome::AlreadyResolved(status)),
        };

        if action == ApprovalAction::Decline {
            self.activity
                .record("approval", format!("Declined download of {}", record.title));
            info!(request_id = %request_id, "Download declined");
            return Ok(ApprovalOutcome::Declined);
        }

        let submission = DownloadSubmission {
            torrent_link: record.torrent_link.clone(),
            target_folder: record.target_folder.clone(),
            category: record.category.clone(),
        };

        match self.executor.submit(&submission).await {
            Ok(handle) => {
                self.pending.lock().resolve(
                    request_id,
                    PendingStatus::Started,
                    handle.clone(),
                    None,
                    now,
                )?;
                self.activity.record(
                    "download",
                    format!("Started download of {} into {}", record.title, record.target_folder),
                );
                info!(request_id = %request_id, executor = self.executor.name(), "Download started");
                Ok(ApprovalOutcome::Started { handle })
            }
            Err(e) => {
                let error = format!("{:#}", e);
                self.pending.lock().resolve(
                    request_id,
                    PendingStatus::Failed,
                    None,
                    Some(error.clone()),
                    now,
                )?;
                self.activity.record_error(
                    "download",
                    format!("Download of {} failed: {}", record.title, error),
                );
                Ok(ApprovalOutcome::Failed(error))
            }
        }
    }

    /// Resolve from raw channel callback data
    pub async fn handle_callback(&self, data: &str, now: DateTime<Utc>) -> Result<ApprovalOutcome> {
        let Some((action, request_id)) = ApprovalAction::parse_callback(data) else {
            bail!("Unrecognized callback data: {}", data);
        };
        self.resolve(request_id, action, now).await
    }

    /// Expire stale open requests
    pub fn expire(&self, now: DateTime<Utc>) -> Result<usize> {
        self.pending.lock().expire_older_than(now, self.max_age)
    }

    pub fn get(&self, request_id: &str) -> Option<PendingDownload> {
        let mut pending = self.pending.lock();
        pending.refresh();
        pending.get(request_id).cloned()
    }

    pub fn open_requests(&self) -> Vec<PendingDownload> {
        let mut pending = self.pending.lock();
        pending.refresh();
        pending.list_open().into_iter().cloned().collect()
    }
}

/// Opaque 12-character request id
fn request_id(title: &str, torrent_link: &str, now: DateTime<Utc>) -> String {
    let source = format!(
        "{}|{}|{}",
        title,
        torrent_link,
        now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp())
    );
    hash_string(&source)[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::rules::RuleConfig;
    use crate::services::downloads::LogExecutor;
    use crate::services::notifications::LogChannel;
    use crate::services::upgrade_evaluator::decide;
    use crate::torrent::quality::Resolution;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use url::Url;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn listing() -> Listing {
        let base = Url::parse("https://iptorrents.com").unwrap();
        Listing::new("Dune.2021.2160p.UHD.BluRay.DV.P7.FEL.TrueHD.Atmos-GRP")
            .with_link("/t/1", &base)
            .with_download_link("/download.php/1/Dune.torrent", &base)
    }

    fn library_match() -> LibraryMatch {
        LibraryMatch {
            title: "Dune".into(),
            year: Some(2021),
            profile: QualityProfile::from_parts(Resolution::Uhd2160, Some(8), false, true, true),
            folder: Some("/movies/Dune (2021)".into()),
        }
    }

    fn desk(dir: &std::path::Path, executor: Arc<dyn DownloadExecutor>) -> ApprovalDesk {
        ApprovalDesk::new(
            PendingRepository::open(dir.join("pending.json")),
            executor,
            Arc::new(LogChannel),
            ActivityLog::new(50),
            Duration::hours(24),
            None,
        )
    }

    async fn open(desk: &ApprovalDesk) -> PendingDownload {
        let l = listing();
        let candidate = QualityProfile::parse(&l.name);
        let m = library_match();
        let decision = decide(&candidate, Some(&m.profile), &RuleConfig::default());
        desk.open_request(&l, &decision, &candidate, Some(&m), t0())
            .await
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_parse_callback() {
        assert_eq!(
            ApprovalAction::parse_callback("dl_yes_abc"),
            Some((ApprovalAction::Approve, "abc"))
        );
        assert_eq!(
            ApprovalAction::parse_callback("dl_no_abc"),
            Some((ApprovalAction::Decline, "abc"))
        );
        assert_eq!(ApprovalAction::parse_callback("dl_yes_"), None);
        assert_eq!(ApprovalAction::parse_callback("something"), None);
    }

    #[tokio::test]
    async fn test_open_request_fields() {
        let dir = tempfile::tempdir().unwrap();
        let desk = desk(dir.path(), Arc::new(LogExecutor::new()));
        let record = open(&desk).await;

        assert_eq!(record.request_id.len(), 12);
        assert_eq!(record.category, "movies-fel");
        assert_eq!(record.target_folder, "/movies/Dune (2021)");
        assert_eq!(record.reason, "Upgrade: DV P8 → P7 FEL");
        assert_eq!(record.current_quality, "DV P8 · 2160p · TrueHD Atmos");
        assert_eq!(desk.open_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_no_download_link_or_folder() {
        let dir = tempfile::tempdir().unwrap();
        let desk = desk(dir.path(), Arc::new(LogExecutor::new()));
        let candidate = QualityProfile::parse("Dune 2160p DV P7 FEL");
        let decision = decide(&candidate, None, &RuleConfig::all_enabled());

        let no_link = Listing::new("Dune 2160p DV P7 FEL");
        assert!(desk.open_request(&no_link, &decision, &candidate, Some(&library_match()), t0()).await.unwrap().is_none());

        // Without a library folder or default folder there is nowhere to download to
        assert!(desk.open_request(&listing(), &decision, &candidate, None, t0()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_approve_submits_download() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(LogExecutor::new());
        let desk = desk(dir.path(), executor.clone());
        let record = open(&desk).await;

        let outcome = desk
            .handle_callback(&record.approve_callback(), t0() + Duration::hours(1))
            .await
            .unwrap();
        assert_matches!(outcome, ApprovalOutcome::Started { .. });

        let submitted = executor.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].category, "movies-fel");
        assert_eq!(submitted[0].target_folder, "/movies/Dune (2021)");
        assert_eq!(desk.get(&record.request_id).unwrap().status, PendingStatus::Started);

        // A second answer does not submit again
        let again = desk.resolve(&record.request_id, ApprovalAction::Approve, t0()).await.unwrap();
        assert_eq!(again, ApprovalOutcome::AlreadyResolved(PendingStatus::Started));
        assert_eq!(executor.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_decline() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(LogExecutor::new());
        let desk = desk(dir.path(), executor.clone());
        let record = open(&desk).await;

        let outcome = desk.resolve(&record.request_id, ApprovalAction::Decline, t0()).await.unwrap();
        assert_eq!(outcome, ApprovalOutcome::Declined);
        assert!(executor.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_expired_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let desk = desk(dir.path(), Arc::new(LogExecutor::new()));
        let record = open(&desk).await;

        let late = t0() + Duration::hours(25);
        assert_eq!(
            desk.resolve(&record.request_id, ApprovalAction::Approve, late).await.unwrap(),
            ApprovalOutcome::Expired
        );
        assert_eq!(
            desk.resolve("nope", ApprovalAction::Approve, t0()).await.unwrap(),
            ApprovalOutcome::NotFound
        );
        assert!(desk.handle_callback("garbage", t0()).await.is_err());
    }

    struct FailingExecutor;

    #[async_trait]
    impl DownloadExecutor for FailingExecutor {
        fn name(&self) -> &str {
            "failing"
        }

        async fn submit(&self, _submission: &DownloadSubmission) -> Result<Option<String>> {
            bail!("client unreachable")
        }
    }

    #[tokio::test]
    async fn test_executor_failure_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let desk = desk(dir.path(), Arc::new(FailingExecutor));
        let record = open(&desk).await;

        let outcome = desk.resolve(&record.request_id, ApprovalAction::Approve, t0()).await.unwrap();
        assert_eq!(outcome, ApprovalOutcome::Failed("client unreachable".into()));
        let stored = desk.get(&record.request_id).unwrap();
        assert_eq!(stored.status, PendingStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("client unreachable"));
    }

    /// Holds each submission open long enough for a second answer to arrive
    struct SlowExecutor {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl DownloadExecutor for SlowExecutor {
        fn name(&self) -> &str {
            "slow"
        }

        async fn submit(&self, _submission: &DownloadSubmission) -> Result<Option<String>> {
            *self.calls.lock() += 1;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(Some("h1".into()))
        }
    }

    #[tokio::test]
    async fn test_concurrent_approvals_submit_once() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(SlowExecutor { calls: Mutex::new(0) });
        let desk = desk(dir.path(), executor.clone());
        let record = open(&desk).await;

        let (first, second) = tokio::join!(
            desk.resolve(&record.request_id, ApprovalAction::Approve, t0()),
            desk.resolve(&record.request_id, ApprovalAction::Approve, t0()),
        );
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, ApprovalOutcome::Started { .. }));

        assert_eq!(*executor.calls.lock(), 1);
        assert_eq!(outcomes[0], ApprovalOutcome::AlreadyResolved(PendingStatus::Submitting));
        assert_matches!(outcomes[1], ApprovalOutcome::Started { .. });
        assert_eq!(desk.get(&record.request_id).unwrap().status, PendingStatus::Started);
    }

    #[tokio::test]
    async fn test_answer_from_other_process_is_seen() {
        let dir = tempfile::tempdir().unwrap();
        let daemon_executor = Arc::new(LogExecutor::new());
        let daemon = desk(dir.path(), daemon_executor.clone());
        let record = open(&daemon).await;

        // A one-shot CLI desk on the same file approves first
        let cli_executor = Arc::new(LogExecutor::new());
        let cli = desk(dir.path(), cli_executor.clone());
        let outcome = cli.resolve(&record.request_id, ApprovalAction::Approve, t0()).await.unwrap();
        assert_matches!(outcome, ApprovalOutcome::Started { .. });

        let again = daemon.resolve(&record.request_id, ApprovalAction::Approve, t0()).await.unwrap();
        assert_eq!(again, ApprovalOutcome::AlreadyResolved(PendingStatus::Started));
        assert!(daemon_executor.submitted().is_empty());
        assert_eq!(cli_executor.submitted().len(), 1);
        assert!(daemon.open_requests().is_empty());
    }
}
