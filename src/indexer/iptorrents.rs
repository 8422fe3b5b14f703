//! IPTorrents search fetcher and results-page parser
//!
//! # Authentication
//!
//! IPTorrents uses cookie-based authentication: the `uid` and `pass`
//! cookies from a logged-in browser session. A logged-in page always
//! contains the logout link (`/lout.php`), which is how an expired session
//! is detected.

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, header};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use super::{
    CookieJar, FetchError, FetchRequest, FetchResponse, Listing, TrackerFetcher, parse_count,
};

pub const DEFAULT_BASE_URL: &str = "https://iptorrents.com";

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

static SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*[\d.,]+\s*(?:[KMGT]i?B|B|bytes)\s*$").unwrap());

static TABLE_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "table#torrents",
        "table.t1",
        "table[class*='torrent']",
        "#content table",
        "table",
    ]
    .iter()
    .filter_map(|s| Selector::parse(s).ok())
    .collect()
});
static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());
static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static SUB_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.sub, span.sub, .sub").unwrap());
static TAG_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.tag, span.new, .tag").unwrap());

/// HTTP fetcher for the IPTorrents search page
pub struct IptFetcher {
    base_url: Url,
    client: Client,
}

impl IptFetcher {
    pub fn new(base_url: &str, user_agent: Option<&str>) -> Result<Self> {
        let base_url = Url::parse(base_url).context("Invalid tracker base URL")?;

        let mut headers = header::HeaderMap::new();
        let user_agent = user_agent.filter(|ua| !ua.is_empty()).unwrap_or(DEFAULT_USER_AGENT);
        match user_agent.parse::<header::HeaderValue>() {
            Ok(v) => {
                headers.insert(header::USER_AGENT, v);
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse user agent header, using default");
                headers.insert(header::USER_AGENT, header::HeaderValue::from_static(DEFAULT_USER_AGENT));
            }
        }

        let client = Client::builder()
            .default_headers(headers)
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { base_url, client })
    }

    /// `{base}/t?q=<term>&qf=adv` with the term form-encoded
    pub fn search_url(&self, search_term: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("q", search_term.trim())
            .append_pair("qf", "adv")
            .finish();
        format!("{}/t?{}", base, query)
    }
}

#[async_trait]
impl TrackerFetcher for IptFetcher {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        if !request.cookies.has_ipt_session() {
            return Err(FetchError::MissingCredentials);
        }

        let url = self.search_url(&request.search_term);
        debug!(url = %url, cookies = %request.cookies.redacted(), "Fetching search page");

        let cookie_header = header::HeaderValue::from_str(&request.cookies.to_header())
            .map_err(|e| FetchError::Transport(format!("invalid cookie header: {}", e)))?;

        let response = self
            .client
            .get(&url)
            .header(header::COOKIE, cookie_header)
            .header(header::REFERER, format!("{}/t", self.base_url.as_str().trim_end_matches('/')))
            .timeout(request.timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let mut cookies = request.cookies.clone();
        for value in response.headers().get_all(header::SET_COOKIE) {
            if let Ok(value) = value.to_str() {
                cookies.apply_set_cookie(value);
            }
        }

        let html = response.text().await.map_err(map_reqwest_error)?;

        if !is_logged_in(&html) {
            return Err(FetchError::NotLoggedIn);
        }

        Ok(FetchResponse {
            html,
            cookies,
            status_ok: true,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = e.status() {
        FetchError::Status(status.as_u16())
    } else {
        FetchError::Transport(e.to_string())
    }
}

/// A logged-in page carries the logout link
pub fn is_logged_in(html: &str) -> bool {
    html.contains("/lout.php")
}

/// Extract listings from a search-results page.
///
/// Never fails: rows without a recognizable title link are skipped and an
/// unexpected page yields an empty list.
pub fn parse_listings(html: &str, base: &Url) -> Vec<Listing> {
    if html.contains("No Torrents Found!") {
        return Vec::new();
    }

    let document = Html::parse_document(html);

    let Some(table) = TABLE_SELECTORS
        .iter()
        .find_map(|sel| document.select(sel).next())
    else {
        return Vec::new();
    };

    table
        .select(&ROW_SELECTOR)
        .filter_map(|row| parse_row(row, base))
        .collect()
}

fn parse_row(row: ElementRef<'_>, base: &Url) -> Option<Listing> {
    // Title links look like /t/1234567; icon-only links have no text
    let title_link = row.select(&LINK_SELECTOR).find(|link| {
        let href = link.value().attr("href").unwrap_or("");
        let text: String = link.text().collect();
        href.starts_with("/t/") && !href.contains('?') && text.trim().len() > 5
    })?;

    let name = clean_title(&title_link.text().collect::<String>());
    if name.is_empty() {
        return None;
    }

    let href = title_link.value().attr("href").unwrap_or("");
    let mut listing = Listing::new(&name).with_link(href, base);

    if let Some(download) = row
        .select(&LINK_SELECTOR)
        .filter_map(|link| link.value().attr("href"))
        .find(|href| href.contains("/download"))
    {
        listing = listing.with_download_link(download, base);
    }

    let cells: Vec<String> = row
        .select(&CELL_SELECTOR)
        .map(|cell| cell.text().collect::<String>())
        .collect();

    if let Some(size) = cells.iter().find(|text| SIZE_RE.is_match(text)) {
        listing = listing.with_size(size);
    }

    // Seeders and leechers are always the last two columns
    if cells.len() >= 3 {
        let seeders = parse_count(&cells[cells.len() - 2]);
        let leechers = parse_count(&cells[cells.len() - 1]);
        listing = listing.with_peers(seeders, leechers);
    }

    // "tags | 2.3 hours ago by uploader"
    if let Some(sub) = row.select(&SUB_SELECTOR).next() {
        let text = sub.text().collect::<String>();
        let added = text.rsplit('|').next().unwrap_or("").trim();
        listing = listing.with_added_raw(added);
    }

    let is_new = row.select(&TAG_SELECTOR).any(|tag| {
        tag.text()
            .collect::<String>()
            .trim()
            .eq_ignore_ascii_case("new")
    });

    Some(listing.with_new_tag(is_new))
}

/// Strip request markers and stray separators from a title
fn clean_title(title: &str) -> String {
    let title = title.trim();
    let title = ["[REQ]", "[REQUEST]", "[REQUESTED]"]
        .iter()
        .find_map(|prefix| title.strip_prefix(prefix))
        .unwrap_or(title);

    title
        .trim()
        .trim_matches(|c| c == '-' || c == ':')
        .trim()
        .to_string()
}

/// Credentials from the environment take precedence over the cookie file
pub fn session_cookies(uid: Option<&str>, pass: Option<&str>, from_file: Option<CookieJar>) -> CookieJar {
    match (uid, pass) {
        (Some(uid), Some(pass)) if !uid.is_empty() && !pass.is_empty() => {
            CookieJar::from_credentials(uid, pass)
        }
        _ => from_file.unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PAGE: &str = r#"
<html><body>
<a href="/lout.php">Logout</a>
<table id="torrents">
  <tr><th>Type</th><th>Name</th><th>DL</th><th>Size</th><th>Snatched</th><th>Seeders</th><th>Leechers</th></tr>
  <tr>
    <td><a href="?72"><img alt="Movie/4K"></a></td>
    <td>
      <a href="/t/5001">Dune.Part.Two.2024.2160p.UHD.BluRay.REMUX.DV.P7.FEL.TrueHD.Atmos-GRP</a>
      <span class="tag">New</span>
      <div class="sub">BL+EL+RPU | 1.5 hours ago by uploader1</div>
    </td>
    <td><a href="/download.php/5001/Dune.torrent"><img></a></td>
    <td>78.4 GB</td>
    <td>120</td>
    <td>1,024</td>
    <td>12</td>
  </tr>
  <tr>
    <td><a href="?72"><img></a></td>
    <td>
      <a href="/t/5002">[REQ] Heat.1995.2160p.BluRay.DV.HDR.x265-GRP</a>
      <div class="sub">3 days ago by uploader2</div>
    </td>
    <td><a href="/download.php/5002/Heat.torrent"><img></a></td>
    <td>40 GB</td>
    <td>7</td>
    <td>n/a</td>
    <td>0</td>
  </tr>
  <tr><td><a href="/t/5003">ab</a></td></tr>
</table>
</body></html>"#;

    fn base() -> Url {
        Url::parse(DEFAULT_BASE_URL).unwrap()
    }

    #[test]
    fn test_parse_listings() {
        let listings = parse_listings(PAGE, &base());
        assert_eq!(listings.len(), 2);

        let dune = &listings[0];
        assert_eq!(dune.name, "Dune.Part.Two.2024.2160p.UHD.BluRay.REMUX.DV.P7.FEL.TrueHD.Atmos-GRP");
        assert_eq!(dune.link, "https://iptorrents.com/t/5001");
        assert_eq!(
            dune.download_link.as_deref(),
            Some("https://iptorrents.com/download.php/5001/Dune.torrent")
        );
        assert_eq!(dune.size_text, "78.4 GB");
        assert_eq!(dune.seeders, 1024);
        assert_eq!(dune.leechers, 12);
        assert_eq!(dune.added_raw, "1.5 hours ago by uploader1");
        assert!(dune.is_new_tag);

        let heat = &listings[1];
        assert_eq!(heat.name, "Heat.1995.2160p.BluRay.DV.HDR.x265-GRP");
        assert_eq!(heat.seeders, 0);
        assert_eq!(heat.added_raw, "3 days ago by uploader2");
        assert!(!heat.is_new_tag);
    }

    #[test]
    fn test_empty_and_unexpected_pages() {
        assert!(parse_listings("<html>No Torrents Found!</html>", &base()).is_empty());
        assert!(parse_listings("<html><body><p>maintenance</p></body></html>", &base()).is_empty());
        assert!(parse_listings("", &base()).is_empty());
    }

    #[test]
    fn test_login_detection() {
        assert!(is_logged_in(PAGE));
        assert!(!is_logged_in("<form action=\"/take_login.php\"></form>"));
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("[REQ] Some Movie 2024"), "Some Movie 2024");
        assert_eq!(clean_title("[REQUEST] Another Title"), "Another Title");
        assert_eq!(clean_title(" - Normal Title : "), "Normal Title");
    }

    #[test]
    fn test_search_url() {
        let fetcher = IptFetcher::new("https://iptorrents.com/", None).unwrap();
        assert_eq!(
            fetcher.search_url("dolby vision"),
            "https://iptorrents.com/t?q=dolby+vision&qf=adv"
        );
    }

    #[test]
    fn test_search_url_encodes_reserved_characters() {
        let fetcher = IptFetcher::new("https://iptorrents.com/", None).unwrap();

        // A literal plus must reach the tracker as a plus, not a space
        let url = fetcher.search_url("BL+EL+RPU");
        assert_eq!(url, "https://iptorrents.com/t?q=BL%2BEL%2BRPU&qf=adv");
        let parsed = Url::parse(&url).unwrap();
        let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![("q".to_string(), "BL+EL+RPU".to_string()), ("qf".to_string(), "adv".to_string())]
        );

        let url = Url::parse(&fetcher.search_url(" Fast & Furious #7 ")).unwrap();
        let q = url.query_pairs().find(|(k, _)| k == "q").map(|(_, v)| v.into_owned());
        assert_eq!(q.as_deref(), Some("Fast & Furious #7"));
        assert_eq!(url.query_pairs().count(), 2);
    }

    #[test]
    fn test_session_cookies_precedence() {
        let file = CookieJar::from_header("uid=file; pass=file");
        let jar = session_cookies(Some("env"), Some("secret"), Some(file.clone()));
        assert_eq!(jar.get("uid"), Some("env"));

        let jar = session_cookies(Some("env"), None, Some(file));
        assert_eq!(jar.get("uid"), Some("file"));

        assert!(session_cookies(None, None, None).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_without_credentials() {
        let fetcher = IptFetcher::new(DEFAULT_BASE_URL, None).unwrap();
        let request = FetchRequest {
            search_term: "BL+EL+RPU".into(),
            cookies: CookieJar::new(),
            timeout: std::time::Duration::from_secs(1),
        };
        assert!(matches!(
            fetcher.fetch(&request).await,
            Err(FetchError::MissingCredentials)
        ));
    }
}
