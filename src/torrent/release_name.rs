//! Title and year extraction from movie release names
//!
//! Handles the two shapes trackers use:
//! - "Movie.Name.2021.2160p.UHD.BluRay..."
//! - "Movie Name (2021) 2160p ..."

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DOTTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)[.\s_]+((?:19|20)\d{2})(?:[.\s_]|$)").unwrap());
static PAREN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)\s*[(\[]((?:19|20)\d{2})[)\]]").unwrap());
static TAG_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*\[(?:req|request|requested)\]\s*").unwrap());

/// Title and year guessed from a release name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseName {
    pub title: String,
    pub year: Option<u16>,
}

impl ReleaseName {
    /// Extract a title guess. Returns `None` when no title can be isolated.
    pub fn parse(name: &str) -> Option<Self> {
        let name = TAG_PREFIX_RE.replace(name, "");
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        for re in [&*PAREN_RE, &*DOTTED_RE] {
            if let Some(caps) = re.captures(name) {
                let title = clean_title(caps.get(1).map_or("", |m| m.as_str()));
                if title.is_empty() {
                    continue;
                }
                return Some(Self {
                    title,
                    year: caps.get(2).and_then(|m| m.as_str().parse().ok()),
                });
            }
        }

        None
    }

    /// Lowercased, punctuation-free key used for library matching
    pub fn normalized_title(&self) -> String {
        normalize_title(&self.title)
    }
}

/// Replace separators with spaces and collapse whitespace
fn clean_title(raw: &str) -> String {
    raw.replace(['.', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a title for comparison: lowercase, alphanumerics only, single spaces
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .replace('&', "and")
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_release() {
        let r = ReleaseName::parse("Dune.Part.Two.2024.2160p.UHD.BluRay.REMUX.DV.P7.FEL-GRP").unwrap();
        assert_eq!(r.title, "Dune Part Two");
        assert_eq!(r.year, Some(2024));
    }

    #[test]
    fn test_parenthesized_year() {
        let r = ReleaseName::parse("The Matrix (1999) 2160p DV HDR").unwrap();
        assert_eq!(r.title, "The Matrix");
        assert_eq!(r.year, Some(1999));
    }

    #[test]
    fn test_title_that_is_a_year() {
        // Only the trailing year counts as the release year
        let r = ReleaseName::parse("1917.2019.2160p.BluRay").unwrap();
        assert_eq!(r.title, "1917");
        assert_eq!(r.year, Some(2019));
    }

    #[test]
    fn test_request_prefix_stripped() {
        let r = ReleaseName::parse("[REQ] Heat.1995.2160p.BluRay").unwrap();
        assert_eq!(r.title, "Heat");
    }

    #[test]
    fn test_no_year() {
        assert_eq!(ReleaseName::parse("Some.Random.Upload.x265"), None);
        assert_eq!(ReleaseName::parse(""), None);
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("Fast & Furious: Hobbs"), "fast and furious hobbs");
        assert_eq!(normalize_title("  Amélie  "), "amélie");
    }
}
