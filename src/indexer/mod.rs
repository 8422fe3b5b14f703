//! Tracker access: listings, the fetcher boundary and HTML extraction
//!
//! The scan pipeline only talks to a tracker through [`TrackerFetcher`], which
//! returns the raw search-results page. [`iptorrents`] provides the HTTP
//! implementation and the page parser.

pub mod cookies;
pub mod iptorrents;
pub mod relative_time;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

pub use cookies::{Cookie, CookieJar};
pub use relative_time::{NormalizedTime, normalize};

/// Name used when a row has no readable title
pub const UNKNOWN_NAME: &str = "Unknown";

/// A single scraped search-result row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub name: String,
    /// Absolute details URL, empty when the row had none
    pub link: String,
    /// Absolute .torrent URL
    pub download_link: Option<String>,
    pub size_text: String,
    pub seeders: u32,
    pub leechers: u32,
    pub added_raw: String,
    pub is_new_tag: bool,

    // Derived during a scan
    pub added: Option<String>,
    pub sort_epoch: Option<DateTime<Utc>>,
    pub is_new_computed: bool,
}

impl Listing {
    /// Create a listing, substituting [`UNKNOWN_NAME`] for a blank name
    pub fn new(name: &str) -> Self {
        let name = name.trim();
        Self {
            name: if name.is_empty() {
                UNKNOWN_NAME.to_string()
            } else {
                name.to_string()
            },
            link: String::new(),
            download_link: None,
            size_text: String::new(),
            seeders: 0,
            leechers: 0,
            added_raw: String::new(),
            is_new_tag: false,
            added: None,
            sort_epoch: None,
            is_new_computed: false,
        }
    }

    /// Set the details link, resolving it against `base`. Unresolvable links are dropped.
    pub fn with_link(mut self, href: &str, base: &Url) -> Self {
        self.link = resolve_link(href, base).unwrap_or_default();
        self
    }

    pub fn with_download_link(mut self, href: &str, base: &Url) -> Self {
        self.download_link = resolve_link(href, base);
        self
    }

    pub fn with_size(mut self, size_text: &str) -> Self {
        self.size_text = size_text.trim().to_string();
        self
    }

    pub fn with_peers(mut self, seeders: u32, leechers: u32) -> Self {
        self.seeders = seeders;
        self.leechers = leechers;
        self
    }

    pub fn with_added_raw(mut self, added_raw: &str) -> Self {
        self.added_raw = added_raw.trim().to_string();
        self
    }

    pub fn with_new_tag(mut self, is_new_tag: bool) -> Self {
        self.is_new_tag = is_new_tag;
        self
    }

    /// Attach the human label and sort instant derived from `added_raw`.
    ///
    /// `sort_epoch` stays `None` when the text could not be parsed so the
    /// ranker can push those rows to the bottom of their group.
    pub fn stamp_time(&mut self, now: DateTime<Utc>) {
        let normalized = normalize(&self.added_raw, now);
        self.sort_epoch = normalized.parsed.then_some(normalized.epoch);
        self.added = Some(normalized.label);
    }
}

/// Resolve a tracker href to an absolute URL
pub fn resolve_link(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if href.starts_with('/') {
        return base.join(href).ok().map(|u| u.to_string());
    }
    Url::parse(href)
        .or_else(|_| base.join(href))
        .ok()
        .map(|u| u.to_string())
}

/// Parse a count cell ("1,234") leniently, zero on failure
pub fn parse_count(text: &str) -> u32 {
    text.trim().replace(',', "").parse().unwrap_or(0)
}

/// Errors at the tracker boundary
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("tracker request timed out")]
    Timeout,
    #[error("tracker returned HTTP {0}")]
    Status(u16),
    #[error("not logged in; the session cookies may have expired")]
    NotLoggedIn,
    #[error("missing tracker credentials")]
    MissingCredentials,
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Transient errors are retried naturally by the next scheduled scan
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout | FetchError::Status(_) | FetchError::Transport(_)
        )
    }
}

/// Parameters of one search fetch
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub search_term: String,
    pub cookies: CookieJar,
    pub timeout: Duration,
}

/// Raw result of a search fetch
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub html: String,
    /// Session cookies after the request, including any the tracker refreshed
    pub cookies: CookieJar,
    pub status_ok: bool,
}

/// Something that can fetch a tracker's search-results page
#[async_trait]
pub trait TrackerFetcher: Send + Sync {
    /// Origin that relative listing links are resolved against
    fn base_url(&self) -> &Url;

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://iptorrents.com").unwrap()
    }

    #[test]
    fn test_blank_name_falls_back() {
        assert_eq!(Listing::new("   ").name, UNKNOWN_NAME);
        assert_eq!(Listing::new(" Movie ").name, "Movie");
    }

    #[test]
    fn test_relative_links_become_absolute() {
        let l = Listing::new("Movie")
            .with_link("/t/12345", &base())
            .with_download_link("/download.php/12345/Movie.torrent", &base());
        assert_eq!(l.link, "https://iptorrents.com/t/12345");
        assert_eq!(
            l.download_link.as_deref(),
            Some("https://iptorrents.com/download.php/12345/Movie.torrent")
        );
    }

    #[test]
    fn test_absolute_link_kept() {
        let l = Listing::new("Movie").with_link("https://other.example/t/1", &base());
        assert_eq!(l.link, "https://other.example/t/1");
        assert_eq!(Listing::new("Movie").with_link("", &base()).link, "");
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(" 1,234 "), 1234);
        assert_eq!(parse_count("n/a"), 0);
        assert_eq!(parse_count("-3"), 0);
    }

    #[test]
    fn test_stamp_time() {
        let now = Utc::now();
        let mut l = Listing::new("Movie").with_added_raw("2 hours ago by someone");
        l.stamp_time(now);
        assert_eq!(l.sort_epoch, Some(now - chrono::Duration::hours(2)));
        assert_eq!(l.added.as_deref(), Some("2 hr ago"));

        let mut l = Listing::new("Movie").with_added_raw("whenever");
        l.stamp_time(now);
        assert_eq!(l.sort_epoch, None);
        assert_eq!(l.added.as_deref(), Some("whenever"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::Status(503).is_transient());
        assert!(!FetchError::MissingCredentials.is_transient());
        assert!(!FetchError::NotLoggedIn.is_transient());
    }
}
