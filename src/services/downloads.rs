//! Download executor boundary
//!
//! Approved requests are handed to a download client as a
//! [`DownloadSubmission`]. The client itself lives outside this crate.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::torrent::quality::QualityProfile;

/// What gets sent to the download client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadSubmission {
    pub torrent_link: String,
    pub target_folder: String,
    pub category: String,
}

/// Download client category for a release of the given quality
pub fn category_for(profile: &QualityProfile) -> &'static str {
    if profile.is_p7_fel() {
        "movies-fel"
    } else if profile.has_dolby_vision {
        "movies-dv"
    } else {
        "movies-hdr"
    }
}

#[async_trait]
pub trait DownloadExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// Queue a download. Returns a client-side handle when one is available.
    async fn submit(&self, submission: &DownloadSubmission) -> Result<Option<String>>;
}

/// Executor that only records and logs submissions.
///
/// Used when no download client is configured, so approvals still leave an
/// auditable trail.
#[derive(Debug, Default)]
pub struct LogExecutor {
    submitted: Mutex<Vec<DownloadSubmission>>,
}

impl LogExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> Vec<DownloadSubmission> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl DownloadExecutor for LogExecutor {
    fn name(&self) -> &str {
        "log"
    }

    async fn submit(&self, submission: &DownloadSubmission) -> Result<Option<String>> {
        info!(
            torrent_link = %submission.torrent_link,
            target_folder = %submission.target_folder,
            category = %submission.category,
            "Download submitted"
        );
        self.submitted.lock().push(submission.clone());
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_for() {
        assert_eq!(category_for(&QualityProfile::parse("Movie DV P7 FEL")), "movies-fel");
        assert_eq!(category_for(&QualityProfile::parse("Movie DV P8")), "movies-dv");
        assert_eq!(category_for(&QualityProfile::parse("Movie HDR10")), "movies-hdr");
    }

    #[tokio::test]
    async fn test_log_executor_records() {
        let executor = LogExecutor::new();
        let submission = DownloadSubmission {
            torrent_link: "https://iptorrents.com/download.php/1/x.torrent".into(),
            target_folder: "/movies/X".into(),
            category: "movies-fel".into(),
        };
        assert_eq!(executor.submit(&submission).await.unwrap(), None);
        assert_eq!(executor.submitted(), vec![submission]);
    }
}
