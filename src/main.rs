//! Upgrade scout - tracker watcher for Dolby Vision / Atmos upgrades
//!
//! Runs the tracker scan on a schedule, or performs a single command from
//! the CLI (`--once`, `--approve <id>`, `--decline <id>`).

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use upgrade_scout::cli::{CliOptions, Command, USAGE};
use upgrade_scout::config::{Config, RuleConfig};
use upgrade_scout::db::{JsonLedger, Ledger, PendingRepository, RunOutcome, ScanStateRepository};
use upgrade_scout::indexer::CookieJar;
use upgrade_scout::indexer::iptorrents::{IptFetcher, session_cookies};
use upgrade_scout::jobs::{self, ScanSettings, Scanner};
use upgrade_scout::services::{
    ActivityLog, ActivityLogConfig, ApprovalAction, ApprovalDesk, ApprovalOutcome,
    JsonLibraryIndex, LogChannel, LogExecutor, NotificationChannel, UpgradeEvaluator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = CliOptions::from_args();
    if options.command == Command::Help {
        println!("{}", USAGE);
        return Ok(());
    }

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let activity = ActivityLog::with_config(ActivityLogConfig {
        capacity: config.activity_log_capacity,
        ..Default::default()
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upgrade_scout=info,activity=info,notifications=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .with(activity.layer())
        .init();

    tracing::info!("Starting upgrade scout");
    tracing::info!(data_dir = %config.data_dir.display(), search_term = %config.search_term, "Configuration loaded");

    let channel: Arc<dyn NotificationChannel> = Arc::new(LogChannel);
    let desk = Arc::new(ApprovalDesk::new(
        PendingRepository::open(config.pending_path()),
        Arc::new(LogExecutor::new()),
        channel.clone(),
        activity.clone(),
        config.approval_max_age,
        config.default_download_folder.clone(),
    ));

    match &options.command {
        Command::Approve(id) => return resolve(&desk, id, ApprovalAction::Approve).await,
        Command::Decline(id) => return resolve(&desk, id, ApprovalAction::Decline).await,
        _ => {}
    }

    let rules = RuleConfig::load(&config.rules_path)?;
    let library = JsonLibraryIndex::load(&config.library_path)?;
    tracing::info!(items = library.len(), "Library index loaded");

    let ledger = JsonLedger::open(config.ledger_path())?;
    tracing::info!(known = ledger.len(), origin = ?ledger.origin(), "Ledger loaded");

    let cookie_file = match CookieJar::load(&config.cookies_path) {
        Ok(jar) => jar,
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "Ignoring unreadable cookie file");
            None
        }
    };
    let cookies = session_cookies(config.ipt_uid.as_deref(), config.ipt_pass.as_deref(), cookie_file);
    if !cookies.has_ipt_session() {
        tracing::warn!("No IPTorrents session cookies; scans will be skipped until IPT_UID/IPT_PASS or a cookie file is provided");
    }

    let fetcher = IptFetcher::new(&config.tracker_base_url, config.user_agent.as_deref())?;

    let settings = ScanSettings {
        search_term: config.search_term.clone(),
        fetch_timeout: config.fetch_timeout,
        max_message_length: config.notify_max_length,
        message_delay: config.notify_delay,
        cookies_path: Some(config.cookies_path.clone()),
    };

    let mut scanner = Scanner::new(
        settings,
        Arc::new(fetcher),
        Box::new(ledger),
        Arc::new(library),
        UpgradeEvaluator::new(rules),
        channel,
        activity.clone(),
        ScanStateRepository::new(config.scan_state_path()),
    )
    .with_cookies(cookies);
    if config.approvals_enabled {
        scanner = scanner.with_approvals(desk.clone());
    }
    let scanner = Arc::new(scanner);

    let cancel = CancellationToken::new();

    if options.command == Command::Once {
        let report = scanner.run(&cancel).await.context("Scan failed")?;
        tracing::info!(
            outcome = ?report.outcome,
            found = report.found,
            new = report.new,
            notified = report.notified,
            "Single scan finished"
        );
        if report.outcome == RunOutcome::FetchFailed {
            anyhow::bail!("Tracker fetch failed: {}", report.error.unwrap_or_default());
        }
        return Ok(());
    }

    let approvals = config.approvals_enabled.then(|| desk.clone());
    let mut scheduler = jobs::start_scheduler(scanner.clone(), config.schedule, approvals, cancel.clone()).await?;

    // Scan once at startup rather than waiting for the first tick
    let startup_scanner = scanner.clone();
    let startup_cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = startup_scanner.run(&startup_cancel).await {
            tracing::error!(job = "scan", "Startup scan error: {:#}", e);
        }
    });

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    cancel.cancel();
    scheduler.shutdown().await?;

    tracing::info!(expired = desk.expire(Utc::now()).unwrap_or(0), "Stopped");
    Ok(())
}

async fn resolve(desk: &ApprovalDesk, request_id: &str, action: ApprovalAction) -> anyhow::Result<()> {
    match desk.resolve(request_id, action, Utc::now()).await? {
        ApprovalOutcome::Started { handle } => {
            println!("Download started for {} ({})", request_id, handle.unwrap_or_else(|| "no handle".to_string()));
        }
        ApprovalOutcome::Declined => println!("Declined {}", request_id),
        ApprovalOutcome::Failed(e) => anyhow::bail!("Download for {} failed: {}", request_id, e),
        ApprovalOutcome::NotFound => anyhow::bail!("No pending request {}", request_id),
        ApprovalOutcome::Expired => anyhow::bail!("Request {} has expired", request_id),
        ApprovalOutcome::AlreadyResolved(status) => {
            println!("Request {} was already {}", request_id, status)
        }
    }
    Ok(())
}
