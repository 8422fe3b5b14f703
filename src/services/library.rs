//! Library index: the quality of titles already owned
//!
//! The scan looks up each candidate's title guess here to get the baseline
//! profile for the upgrade decision. [`JsonLibraryIndex`] reads an exported
//! item list; a media-server backed index can implement [`LibraryIndex`] too.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::json_file;
use crate::torrent::quality::{QualityProfile, Resolution};
use crate::torrent::release_name::normalize_title;

/// A library item matched to a release
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryMatch {
    pub title: String,
    pub year: Option<u16>,
    pub profile: QualityProfile,
    /// Folder the current copy lives in, used as the download target
    pub folder: Option<String>,
}

#[async_trait]
pub trait LibraryIndex: Send + Sync {
    /// Find the owned copy of a title. `year` narrows the match when known.
    async fn lookup(&self, title: &str, year: Option<u16>) -> Option<LibraryMatch>;
}

/// One exported library entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LibraryItem {
    pub title: String,
    pub year: Option<u16>,
    pub dv_profile: Option<u8>,
    pub dv_fel: bool,
    pub has_atmos: bool,
    pub resolution: String,
    /// HDR10 present (ignored when the item has Dolby Vision)
    pub hdr: bool,
    pub folder: Option<String>,
}

impl LibraryItem {
    pub fn profile(&self) -> QualityProfile {
        QualityProfile::from_parts(
            Resolution::from_label(&self.resolution),
            self.dv_profile,
            self.dv_fel,
            self.has_atmos,
            self.hdr,
        )
    }

    fn to_match(&self) -> LibraryMatch {
        LibraryMatch {
            title: self.title.clone(),
            year: self.year,
            profile: self.profile(),
            folder: self.folder.clone(),
        }
    }
}

/// Library index backed by a JSON array of [`LibraryItem`]
#[derive(Debug, Default)]
pub struct JsonLibraryIndex {
    by_title: HashMap<String, Vec<LibraryItem>>,
}

impl JsonLibraryIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<LibraryItem>) -> Self {
        let mut by_title: HashMap<String, Vec<LibraryItem>> = HashMap::new();
        for item in items {
            let key = normalize_title(&item.title);
            if key.is_empty() {
                continue;
            }
            by_title.entry(key).or_default().push(item);
        }
        Self { by_title }
    }

    /// Load the index. A missing file gives an empty index.
    pub fn load(path: &Path) -> Result<Self> {
        match json_file::read::<Vec<LibraryItem>>(path)? {
            Some(items) => {
                info!(path = %path.display(), count = items.len(), "Loaded library index");
                Ok(Self::from_items(items))
            }
            None => {
                warn!(path = %path.display(), "Library file not found, every title will be unmatched");
                Ok(Self::empty())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.by_title.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_title.is_empty()
    }
}

#[async_trait]
impl LibraryIndex for JsonLibraryIndex {
    async fn lookup(&self, title: &str, year: Option<u16>) -> Option<LibraryMatch> {
        let key = normalize_title(title);
        let candidates = self.by_title.get(&key)?;

        // Exact year first, then any item with this title
        let item = year
            .and_then(|y| candidates.iter().find(|i| i.year == Some(y)))
            .or_else(|| candidates.first())?;

        debug!(title = %title, matched = %item.title, year = ?item.year, "Library match");
        Some(item.to_match())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::quality::DvTier;

    fn index() -> JsonLibraryIndex {
        JsonLibraryIndex::from_items(vec![
            LibraryItem {
                title: "Dune".into(),
                year: Some(1984),
                resolution: "1080p".into(),
                folder: Some("/movies/Dune (1984)".into()),
                ..Default::default()
            },
            LibraryItem {
                title: "Dune".into(),
                year: Some(2021),
                dv_profile: Some(8),
                has_atmos: true,
                resolution: "4K".into(),
                folder: Some("/movies/Dune (2021)".into()),
                ..Default::default()
            },
            LibraryItem {
                title: "Spider-Man: No Way Home".into(),
                year: Some(2021),
                hdr: true,
                resolution: "2160p".into(),
                ..Default::default()
            },
        ])
    }

    #[tokio::test]
    async fn test_lookup_prefers_year() {
        let m = index().lookup("Dune", Some(2021)).await.unwrap();
        assert_eq!(m.year, Some(2021));
        assert_eq!(m.profile.dolby_vision_profile, Some(8));
        assert_eq!(m.profile.resolution, Resolution::Uhd2160);
        assert_eq!(m.folder.as_deref(), Some("/movies/Dune (2021)"));
    }

    #[tokio::test]
    async fn test_lookup_falls_back_to_title() {
        let m = index().lookup("Dune", Some(1999)).await.unwrap();
        assert_eq!(m.year, Some(1984));
        assert!(index().lookup("Dune", None).await.is_some());
    }

    #[tokio::test]
    async fn test_lookup_normalizes_punctuation() {
        let m = index().lookup("Spider Man No Way Home", Some(2021)).await.unwrap();
        assert!(!m.profile.has_dolby_vision);
        assert_eq!(m.profile.dv_tier(), DvTier::None);
    }

    #[tokio::test]
    async fn test_unknown_title() {
        assert!(index().lookup("Heat", Some(1995)).await.is_none());
        assert!(JsonLibraryIndex::empty().lookup("Dune", None).await.is_none());
    }

    #[test]
    fn test_item_deserializes_camel_case() {
        let item: LibraryItem = serde_json::from_str(
            r#"{"title":"Heat","year":1995,"dvProfile":7,"dvFel":true,"hasAtmos":true,"resolution":"2160p"}"#,
        )
        .unwrap();
        assert!(item.profile().is_p7_fel());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let index = JsonLibraryIndex::load(&dir.path().join("library.json")).unwrap();
        assert!(index.is_empty());
    }
}
