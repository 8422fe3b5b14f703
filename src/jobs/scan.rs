//! Scan job
//!
//! One scan walks `Idle → Fetching → Parsing → Deduplicating → Deciding →
//! Notifying → Persisting → Idle`. Everything a run learns is carried in a
//! [`ScanSession`]; the ledger, library, channel and activity log are
//! injected collaborators owned by the [`Scanner`].
//!
//! Only one scan runs at a time. A trigger that arrives while a scan is in
//! flight is skipped rather than queued.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::{LastRun, Ledger, LedgerOrigin, RunOutcome, ScanState, ScanStateRepository};
use crate::indexer::iptorrents::parse_listings;
use crate::indexer::{CookieJar, FetchError, FetchRequest, FetchResponse, Listing, TrackerFetcher};
use crate::services::approvals::ApprovalDesk;
use crate::services::fingerprint::{IdentifierSet, fingerprint};
use crate::services::library::{LibraryIndex, LibraryMatch};
use crate::services::logging::ActivityLog;
use crate::services::notifications::{
    DecidedListing, NotificationChannel, NotificationComposer, deliver_blocks,
};
use crate::services::ranker::rank;
use crate::services::upgrade_evaluator::{Decision, UpgradeEvaluator};
use crate::torrent::{QualityProfile, ReleaseName};

/// Phase of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Fetching,
    Parsing,
    Deduplicating,
    Deciding,
    Notifying,
    Persisting,
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanPhase::Idle => "idle",
            ScanPhase::Fetching => "fetching",
            ScanPhase::Parsing => "parsing",
            ScanPhase::Deduplicating => "deduplicating",
            ScanPhase::Deciding => "deciding",
            ScanPhase::Notifying => "notifying",
            ScanPhase::Persisting => "persisting",
        };
        write!(f, "{}", s)
    }
}

/// Tunables for the scan job
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub search_term: String,
    pub fetch_timeout: Duration,
    pub max_message_length: usize,
    pub message_delay: Duration,
    /// Where refreshed session cookies are written back
    pub cookies_path: Option<PathBuf>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            search_term: "BL+EL+RPU".to_string(),
            fetch_timeout: Duration::from_secs(30),
            max_message_length: crate::services::notifications::DEFAULT_MAX_LENGTH,
            message_delay: Duration::from_secs(1),
            cookies_path: None,
        }
    }
}

/// Result of one scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub found: usize,
    pub new: usize,
    /// Listings included in outbound notifications
    pub notified: usize,
    pub blocks: usize,
    pub delivered: usize,
    pub approvals_opened: usize,
    pub first_run: bool,
    pub error: Option<String>,
}

impl ScanReport {
    fn empty(started_at: DateTime<Utc>, outcome: RunOutcome) -> Self {
        Self {
            started_at,
            finished_at: Utc::now(),
            outcome,
            found: 0,
            new: 0,
            notified: 0,
            blocks: 0,
            delivered: 0,
            approvals_opened: 0,
            first_run: false,
            error: None,
        }
    }

    fn last_run(&self) -> LastRun {
        LastRun {
            started_at: self.started_at,
            finished_at: self.finished_at,
            found: self.found,
            new: self.new,
            notified: self.notified,
            first_run: self.first_run,
            outcome: self.outcome,
            error: self.error.clone(),
        }
    }
}

/// A new listing with everything the later phases need
#[derive(Debug, Clone)]
struct Candidate {
    listing: Listing,
    ids: IdentifierSet,
    profile: QualityProfile,
    library: Option<LibraryMatch>,
    decision: Option<Decision>,
}

/// Everything one scan has learned so far
#[derive(Debug)]
pub struct ScanSession {
    phase: ScanPhase,
    started_at: DateTime<Utc>,
    first_run: bool,
    listings: Vec<Listing>,
    candidates: Vec<Candidate>,
}

impl ScanSession {
    fn new(started_at: DateTime<Utc>, first_run: bool) -> Self {
        Self {
            phase: ScanPhase::Idle,
            started_at,
            first_run,
            listings: Vec::new(),
            candidates: Vec::new(),
        }
    }

    fn enter(&mut self, phase: ScanPhase) {
        debug!(job = "scan", from = %self.phase, to = %phase, "Scan phase");
        self.phase = phase;
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    fn report(&self, outcome: RunOutcome) -> ScanReport {
        ScanReport {
            first_run: self.first_run,
            found: self.listings.len(),
            new: self.candidates.len(),
            ..ScanReport::empty(self.started_at, outcome)
        }
    }
}

/// Runs tracker scans against the ledger and library
pub struct Scanner {
    settings: ScanSettings,
    fetcher: Arc<dyn TrackerFetcher>,
    ledger: Mutex<Box<dyn Ledger>>,
    library: Arc<dyn LibraryIndex>,
    evaluator: UpgradeEvaluator,
    channel: Arc<dyn NotificationChannel>,
    approvals: Option<Arc<ApprovalDesk>>,
    activity: ActivityLog,
    state: ScanStateRepository,
    cookies: Mutex<CookieJar>,
    /// Set while the ledger has never completed a scan in this process
    baseline_pending: AtomicBool,
    running: tokio::sync::Mutex<()>,
}

impl Scanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: ScanSettings,
        fetcher: Arc<dyn TrackerFetcher>,
        ledger: Box<dyn Ledger>,
        library: Arc<dyn LibraryIndex>,
        evaluator: UpgradeEvaluator,
        channel: Arc<dyn NotificationChannel>,
        activity: ActivityLog,
        state: ScanStateRepository,
    ) -> Self {
        let baseline_pending = ledger.origin() == LedgerOrigin::Created;
        Self {
            settings,
            fetcher,
            ledger: Mutex::new(ledger),
            library,
            evaluator,
            channel,
            approvals: None,
            activity,
            state,
            cookies: Mutex::new(CookieJar::new()),
            baseline_pending: AtomicBool::new(baseline_pending),
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_approvals(mut self, approvals: Arc<ApprovalDesk>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    pub fn with_cookies(self, cookies: CookieJar) -> Self {
        *self.cookies.lock() = cookies;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    pub fn known_count(&self) -> usize {
        self.ledger.lock().len()
    }

    /// Cached listings and last-run summary from the most recent scan
    pub fn last_state(&self) -> ScanState {
        self.state.load()
    }

    /// Run one scan.
    ///
    /// Fetch failures and missing credentials end the run without touching
    /// the ledger and are reported through the returned outcome. Only a
    /// failure to persist the ledger is returned as an error.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<ScanReport> {
        let started_at = Utc::now();

        let Ok(_guard) = self.running.try_lock() else {
            info!(job = "scan", "Scan already in progress, skipping");
            return Ok(ScanReport::empty(started_at, RunOutcome::Skipped));
        };

        let mut session = ScanSession::new(started_at, self.baseline_pending.load(Ordering::SeqCst));

        if cancel.is_cancelled() {
            return Ok(self.cancelled(&session));
        }

        // Fetching
        session.enter(ScanPhase::Fetching);
        let response = match self.fetch(cancel).await {
            Some(Ok(response)) => response,
            Some(Err(e)) => return Ok(self.fetch_failed(&mut session, e)),
            None => return Ok(self.cancelled(&session)),
        };
        self.store_cookies(response.cookies);

        // Parsing
        session.enter(ScanPhase::Parsing);
        session.listings = parse_listings(&response.html, self.fetcher.base_url());
        for listing in &mut session.listings {
            listing.stamp_time(started_at);
        }
        info!(job = "scan", found = session.listings.len(), "Parsed search results");

        if cancel.is_cancelled() {
            return Ok(self.cancelled(&session));
        }

        // Deduplicating
        // Ranking first keeps the candidates in presentation order
        session.enter(ScanPhase::Deduplicating);
        session.listings = rank(&session.listings);
        self.deduplicate(&mut session);

        if cancel.is_cancelled() {
            return Ok(self.cancelled(&session));
        }

        // Deciding
        session.enter(ScanPhase::Deciding);
        self.decide_all(&mut session).await;

        if cancel.is_cancelled() {
            return Ok(self.cancelled(&session));
        }

        // Notifying. From here on the run always persists so delivered
        // listings are never announced twice.
        session.enter(ScanPhase::Notifying);
        let mut report = if session.first_run {
            self.suppress_baseline(&session)
        } else {
            self.notify(&session).await
        };

        // Persisting
        session.enter(ScanPhase::Persisting);
        let persisted = self.persist(&session);
        report.finished_at = Utc::now();
        if let Err(e) = &persisted {
            report.error = Some(format!("{:#}", e));
        }
        self.save_state(&session, &report);
        session.enter(ScanPhase::Idle);

        persisted?;
        self.baseline_pending.store(false, Ordering::SeqCst);

        info!(
            job = "scan",
            found = report.found,
            new = report.new,
            notified = report.notified,
            delivered = report.delivered,
            blocks = report.blocks,
            first_run = report.first_run,
            "Scan complete"
        );
        Ok(report)
    }

    /// Fetch the search page. `None` means the scan was cancelled mid-fetch.
    async fn fetch(&self, cancel: &CancellationToken) -> Option<Result<FetchResponse, FetchError>> {
        let request = FetchRequest {
            search_term: self.settings.search_term.clone(),
            cookies: self.cookies.lock().clone(),
            timeout: self.settings.fetch_timeout,
        };

        tokio::select! {
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(self.settings.fetch_timeout, self.fetcher.fetch(&request)) => {
                Some(result.unwrap_or(Err(FetchError::Timeout)))
            }
        }
    }

    fn store_cookies(&self, cookies: CookieJar) {
        let mut current = self.cookies.lock();
        if *current == cookies {
            return;
        }
        *current = cookies;

        if let Some(path) = &self.settings.cookies_path
            && let Err(e) = current.save(path)
        {
            warn!(path = %path.display(), error = %format!("{:#}", e), "Failed to save refreshed cookies");
        }
    }

    fn deduplicate(&self, session: &mut ScanSession) {
        let base = self.fetcher.base_url();
        let ledger = self.ledger.lock();
        let mut seen_this_run = HashSet::new();

        for listing in &mut session.listings {
            let ids = fingerprint(listing, base);
            listing.is_new_computed = !ledger.contains(&ids);

            if listing.is_new_computed && seen_this_run.insert(ids.primary.clone()) {
                session.candidates.push(Candidate {
                    profile: QualityProfile::parse(&listing.name),
                    listing: listing.clone(),
                    ids,
                    library: None,
                    decision: None,
                });
            }
        }

        info!(job = "scan", new = session.candidates.len(), known = ledger.len(), "Deduplicated listings");
    }

    async fn decide_all(&self, session: &mut ScanSession) {
        for candidate in &mut session.candidates {
            let library = match ReleaseName::parse(&candidate.listing.name) {
                Some(release) => self.library.lookup(&release.title, release.year).await,
                None => None,
            };

            let decision = self
                .evaluator
                .decide(&candidate.profile, library.as_ref().map(|m| &m.profile));

            let message = format!(
                "{} [{}] {}",
                candidate.listing.name,
                decision.reason_code.as_str(),
                decision.reason_text
            );
            if session.first_run {
                // Baseline runs never notify, so the verdict is informational
                self.activity
                    .record("baseline", format!("{} (first run, not notified)", message));
            } else if decision.should_notify() {
                self.activity.record("decision", message);
            } else {
                debug!(job = "scan", torrent = %candidate.listing.name, reason = %decision.reason_text, "Skipped");
                self.activity.record("skip", message);
            }

            candidate.library = library;
            candidate.decision = Some(decision);
        }
    }

    fn suppress_baseline(&self, session: &ScanSession) -> ScanReport {
        self.activity.record(
            "scan",
            format!(
                "First run: recorded {} listings without notifying",
                session.candidates.len()
            ),
        );
        session.report(RunOutcome::Baseline)
    }

    async fn notify(&self, session: &ScanSession) -> ScanReport {
        let mut report = session.report(RunOutcome::Completed);

        let notify: Vec<&Candidate> = session
            .candidates
            .iter()
            .filter(|c| c.decision.as_ref().is_some_and(Decision::should_notify))
            .collect();
        if notify.is_empty() {
            return report;
        }

        let entries: Vec<DecidedListing> = notify
            .iter()
            .filter_map(|c| {
                c.decision.clone().map(|decision| DecidedListing {
                    listing: c.listing.clone(),
                    decision,
                })
            })
            .collect();

        let blocks = NotificationComposer::new(&self.settings.search_term, session.started_at)
            .compose(&entries, self.settings.max_message_length);
        let deliveries =
            deliver_blocks(self.channel.as_ref(), &blocks, self.settings.message_delay).await;

        report.notified = entries.len();
        report.blocks = blocks.len();
        report.delivered = deliveries.iter().filter(|d| d.is_delivered()).count();

        if report.delivered < report.blocks {
            self.activity.record_warn(
                "notification",
                format!(
                    "Delivered {} of {} notification blocks via {}",
                    report.delivered,
                    report.blocks,
                    self.channel.name()
                ),
            );
        }

        if let Some(approvals) = &self.approvals {
            for candidate in notify {
                let Some(decision) = &candidate.decision else { continue };
                match approvals
                    .open_request(
                        &candidate.listing,
                        decision,
                        &candidate.profile,
                        candidate.library.as_ref(),
                        Utc::now(),
                    )
                    .await
                {
                    Ok(Some(_)) => report.approvals_opened += 1,
                    Ok(None) => {}
                    Err(e) => self.activity.record_warn(
                        "approval",
                        format!("Failed to open approval for {}: {:#}", candidate.listing.name, e),
                    ),
                }
            }
        }

        report
    }

    /// Record every new listing. Stops at the first write failure.
    fn persist(&self, session: &ScanSession) -> Result<()> {
        let mut ledger = self.ledger.lock();
        for candidate in &session.candidates {
            if let Err(e) = ledger.add(&candidate.ids) {
                error!(job = "scan", error = %format!("{:#}", e), "Failed to persist ledger");
                self.activity.record_error(
                    "ledger",
                    format!("Ledger write failed, listings may be announced again: {:#}", e),
                );
                return Err(e);
            }
        }
        Ok(())
    }

    fn save_state(&self, session: &ScanSession, report: &ScanReport) {
        let state = ScanState {
            last_run: Some(report.last_run()),
            listings: session.listings.clone(),
        };
        if let Err(e) = self.state.save(&state) {
            warn!(job = "scan", error = %format!("{:#}", e), "Failed to save scan state");
        }
    }

    fn fetch_failed(&self, session: &mut ScanSession, e: FetchError) -> ScanReport {
        let outcome = match e {
            FetchError::MissingCredentials => {
                self.activity.record_warn(
                    "scan",
                    "Scan skipped: no tracker credentials configured (set IPT_UID/IPT_PASS or a cookies file)",
                );
                RunOutcome::Skipped
            }
            ref e if e.is_transient() => {
                self.activity
                    .record_warn("scan", format!("Tracker fetch failed, will retry next run: {}", e));
                RunOutcome::FetchFailed
            }
            ref e => {
                self.activity.record_error("scan", format!("Tracker fetch failed: {}", e));
                RunOutcome::FetchFailed
            }
        };
        session.enter(ScanPhase::Idle);

        let mut report = session.report(outcome);
        report.error = Some(e.to_string());
        if let Err(e) = self.state.save_last_run(report.last_run()) {
            warn!(job = "scan", error = %format!("{:#}", e), "Failed to save last run");
        }
        report
    }

    fn cancelled(&self, session: &ScanSession) -> ScanReport {
        info!(job = "scan", phase = %session.phase, "Scan cancelled, discarding results");
        ScanReport {
            found: 0,
            new: 0,
            ..session.report(RunOutcome::Cancelled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(ScanPhase::Deduplicating.to_string(), "deduplicating");
        assert_eq!(ScanPhase::Idle.to_string(), "idle");
    }

    #[test]
    fn test_report_to_last_run() {
        let session = ScanSession::new(Utc::now(), true);
        let report = session.report(RunOutcome::Baseline);
        let last_run = report.last_run();
        assert_eq!(last_run.outcome, RunOutcome::Baseline);
        assert!(last_run.first_run);
        assert_eq!(last_run.started_at, session.started_at);
    }

    #[test]
    fn test_default_settings() {
        let settings = ScanSettings::default();
        assert_eq!(settings.search_term, "BL+EL+RPU");
        assert_eq!(settings.fetch_timeout, Duration::from_secs(30));
        assert_eq!(settings.max_message_length, 4000);
    }
}
