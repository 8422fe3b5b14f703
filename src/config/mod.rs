//! Application configuration management

pub mod rules;

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::jobs::Schedule;
use crate::services::notifications::MIN_MAX_LENGTH;

pub use rules::RuleConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the ledger, scan state and pending approvals
    pub data_dir: PathBuf,

    /// Tracker search query
    pub search_term: String,

    pub tracker_base_url: String,

    /// Cookie export used when IPT_UID/IPT_PASS are not set
    pub cookies_path: PathBuf,

    pub ipt_uid: Option<String>,
    pub ipt_pass: Option<String>,

    pub user_agent: Option<String>,

    pub fetch_timeout: Duration,

    pub schedule: Schedule,

    /// Longest notification block, in characters
    pub notify_max_length: usize,

    /// Pause between notification blocks
    pub notify_delay: Duration,

    pub rules_path: PathBuf,

    pub library_path: PathBuf,

    /// Target folder for titles not in the library
    pub default_download_folder: Option<String>,

    pub approvals_enabled: bool,

    pub activity_log_capacity: usize,

    pub approval_max_age: chrono::Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_source(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "./data".to_string()));
        let data_path = |key: &str, file: &str| {
            get(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join(file))
        };

        let schedule = match get("SCAN_INTERVAL") {
            Some(text) => text.parse().context("Invalid SCAN_INTERVAL")?,
            None => Schedule::default(),
        };

        let fetch_timeout_secs: u64 = parse_or(get("FETCH_TIMEOUT_SECS"), 30)
            .context("Invalid FETCH_TIMEOUT_SECS")?;
        let notify_max_length: usize = parse_or(get("NOTIFY_MAX_LENGTH"), 4000)
            .context("Invalid NOTIFY_MAX_LENGTH")?;
        let notify_delay_ms: u64 =
            parse_or(get("NOTIFY_DELAY_MS"), 1000).context("Invalid NOTIFY_DELAY_MS")?;
        let activity_log_capacity: usize = parse_or(get("ACTIVITY_LOG_CAPACITY"), 500)
            .context("Invalid ACTIVITY_LOG_CAPACITY")?;
        let approval_max_age_hours: i64 = parse_or(get("APPROVAL_MAX_AGE_HOURS"), 24)
            .context("Invalid APPROVAL_MAX_AGE_HOURS")?;

        let approvals_enabled = match get("APPROVALS_ENABLED") {
            Some(v) => parse_bool(&v).context("Invalid APPROVALS_ENABLED")?,
            None => true,
        };

        if fetch_timeout_secs == 0 {
            anyhow::bail!("FETCH_TIMEOUT_SECS must be greater than zero");
        }
        if notify_max_length < MIN_MAX_LENGTH {
            anyhow::bail!(
                "NOTIFY_MAX_LENGTH must be at least {} (got {})",
                MIN_MAX_LENGTH,
                notify_max_length
            );
        }

        Ok(Self {
            cookies_path: data_path("IPT_COOKIES_PATH", "cookies.json"),
            rules_path: data_path("RULES_PATH", "rules.json"),
            library_path: data_path("LIBRARY_PATH", "library.json"),
            search_term: get("SEARCH_TERM").unwrap_or_else(|| "BL+EL+RPU".to_string()),
            tracker_base_url: get("TRACKER_BASE_URL")
                .unwrap_or_else(|| crate::indexer::iptorrents::DEFAULT_BASE_URL.to_string()),
            ipt_uid: get("IPT_UID"),
            ipt_pass: get("IPT_PASS"),
            user_agent: get("USER_AGENT"),
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            schedule,
            notify_max_length,
            notify_delay: Duration::from_millis(notify_delay_ms),
            default_download_folder: get("DEFAULT_DOWNLOAD_FOLDER"),
            approvals_enabled,
            activity_log_capacity: activity_log_capacity.max(1),
            approval_max_age: chrono::Duration::hours(approval_max_age_hours.max(1)),
            data_dir,
        })
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("known_torrents.json")
    }

    pub fn scan_state_path(&self) -> PathBuf {
        self.data_dir.join("scan_state.json")
    }

    pub fn pending_path(&self) -> PathBuf {
        self.data_dir.join("pending_downloads.json")
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(v) => Ok(v.parse()?),
        None => Ok(default),
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("expected a boolean, got '{}'", other),
    }
}
