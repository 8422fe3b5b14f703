//! Quality profile parsing for release titles
//!
//! Turns a free-text release title like
//! `Movie.2019.2160p.UHD.BluRay.DV.P7.FEL.BL+EL+RPU.TrueHD.7.1.Atmos-GRP`
//! into a [`QualityProfile`]. Parsing never fails: anything that is not
//! recognized is simply ignored and leaves the corresponding field unset.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static RES_2160_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:2160p|4k|uhd)\b").unwrap());
static RES_1080_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b1080[pi]\b").unwrap());
static RES_720_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b720p\b").unwrap());

static DV_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:dv|dovi|dolby[\s._-]?vision)\b").unwrap());
static DV_PROFILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:profile[\s._-]?|p)([4-9])\b").unwrap());
static FEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bfel\b").unwrap());
static FEL_LAYERS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bbl[\s._+]+el[\s._+]+rpu\b").unwrap());
static MEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bmel\b").unwrap());
static BL_EL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bbl[\s._+]+el\b").unwrap());
static HDR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bhdr(?:10)?(?:\+|plus)?(?:[^a-z0-9]|$)").unwrap());
static ATMOS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)atmos").unwrap());

/// Resolution tier, ordered from worst to best
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    #[default]
    Unknown,
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Hd1080,
    #[serde(rename = "2160p")]
    Uhd2160,
}

impl Resolution {
    /// Ordinal used for comparisons: none=0, 720p=1, 1080p=2, 2160p=3
    pub fn rank(self) -> u8 {
        match self {
            Resolution::Unknown => 0,
            Resolution::Hd720 => 1,
            Resolution::Hd1080 => 2,
            Resolution::Uhd2160 => 3,
        }
    }

    /// Detect the best resolution token in a release title
    pub fn from_title(title: &str) -> Self {
        if RES_2160_RE.is_match(title) {
            Resolution::Uhd2160
        } else if RES_1080_RE.is_match(title) {
            Resolution::Hd1080
        } else if RES_720_RE.is_match(title) {
            Resolution::Hd720
        } else {
            Resolution::Unknown
        }
    }

    /// Normalize a resolution label as stored by a media server ("4K", "fhd", "1080")
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "2160p" | "2160" | "4k" | "uhd" | "4k uhd" => Resolution::Uhd2160,
            "1080p" | "1080i" | "1080" | "fhd" | "full hd" => Resolution::Hd1080,
            "720p" | "720" | "hd" => Resolution::Hd720,
            other => Self::from_title(other),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Unknown => write!(f, "unknown"),
            Resolution::Hd720 => write!(f, "720p"),
            Resolution::Hd1080 => write!(f, "1080p"),
            Resolution::Uhd2160 => write!(f, "2160p"),
        }
    }
}

/// Dynamic range kind carried by a release
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DynamicRange {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "HDR10")]
    Hdr10,
    #[serde(rename = "DV")]
    DolbyVision,
}

impl fmt::Display for DynamicRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynamicRange::None => write!(f, "SDR"),
            DynamicRange::Hdr10 => write!(f, "HDR10"),
            DynamicRange::DolbyVision => write!(f, "Dolby Vision"),
        }
    }
}

/// Preference order of Dolby Vision variants.
///
/// no-DV < profile-non-7 < profile-7-MEL < profile-7-FEL. A DV release with
/// an unknown profile counts as non-7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DvTier {
    None,
    Basic,
    P7Mel,
    P7Fel,
}

/// Structured quality descriptor of a release or a library item
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityProfile {
    pub resolution: Resolution,
    pub has_dolby_vision: bool,
    pub dolby_vision_profile: Option<u8>,
    /// Only meaningful for profile 7
    pub dolby_vision_has_fel: bool,
    pub has_atmos: bool,
    pub dynamic_range: DynamicRange,
}

impl QualityProfile {
    /// Parse a release title. Unknown tokens are ignored.
    pub fn parse(title: &str) -> Self {
        let resolution = Resolution::from_title(title);

        let fel_layers = FEL_RE.is_match(title) || FEL_LAYERS_RE.is_match(title);
        let mel_layers = !fel_layers && (MEL_RE.is_match(title) || BL_EL_RE.is_match(title));

        // Enhancement layers only exist in profile 7
        let dolby_vision_profile = DV_PROFILE_RE
            .captures(title)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u8>().ok())
            .or(if fel_layers || mel_layers { Some(7) } else { None });

        let has_dolby_vision =
            DV_RE.is_match(title) || dolby_vision_profile.is_some() || fel_layers || mel_layers;

        let dynamic_range = if has_dolby_vision {
            DynamicRange::DolbyVision
        } else if HDR_RE.is_match(title) {
            DynamicRange::Hdr10
        } else {
            DynamicRange::None
        };

        Self {
            resolution,
            has_dolby_vision,
            dolby_vision_profile,
            dolby_vision_has_fel: fel_layers && dolby_vision_profile == Some(7),
            has_atmos: ATMOS_RE.is_match(title),
            dynamic_range,
        }
    }

    /// Build a profile from discrete metadata fields (library items, stored records)
    pub fn from_parts(
        resolution: Resolution,
        dolby_vision_profile: Option<u8>,
        dolby_vision_has_fel: bool,
        has_atmos: bool,
        has_hdr10: bool,
    ) -> Self {
        let has_dolby_vision = dolby_vision_profile.is_some() || dolby_vision_has_fel;
        let dolby_vision_profile = dolby_vision_profile.or(dolby_vision_has_fel.then_some(7));

        let dynamic_range = if has_dolby_vision {
            DynamicRange::DolbyVision
        } else if has_hdr10 {
            DynamicRange::Hdr10
        } else {
            DynamicRange::None
        };

        Self {
            resolution,
            has_dolby_vision,
            dolby_vision_profile,
            dolby_vision_has_fel: dolby_vision_has_fel && dolby_vision_profile == Some(7),
            has_atmos,
            dynamic_range,
        }
    }

    pub fn resolution_rank(&self) -> u8 {
        self.resolution.rank()
    }

    pub fn is_p7_fel(&self) -> bool {
        self.has_dolby_vision && self.dolby_vision_profile == Some(7) && self.dolby_vision_has_fel
    }

    pub fn dv_tier(&self) -> DvTier {
        if !self.has_dolby_vision {
            DvTier::None
        } else if self.dolby_vision_profile != Some(7) {
            DvTier::Basic
        } else if self.dolby_vision_has_fel {
            DvTier::P7Fel
        } else {
            DvTier::P7Mel
        }
    }

    /// Short label for the Dolby Vision part, e.g. "DV P7 FEL", "DV", "HDR10"
    pub fn dv_label(&self) -> String {
        match (self.has_dolby_vision, self.dolby_vision_profile) {
            (false, _) => match self.dynamic_range {
                DynamicRange::Hdr10 => "HDR10".to_string(),
                _ => "HDR10/SDR".to_string(),
            },
            (true, Some(7)) if self.dolby_vision_has_fel => "DV P7 FEL".to_string(),
            (true, Some(7)) => "DV P7 MEL".to_string(),
            (true, Some(p)) => format!("DV P{}", p),
            (true, None) => "DV".to_string(),
        }
    }

    /// One-line human summary used in notifications
    pub fn summary(&self) -> String {
        let mut parts = vec![self.dv_label()];
        if self.resolution != Resolution::Unknown {
            parts.push(self.resolution.to_string());
        }
        if self.has_atmos {
            parts.push("TrueHD Atmos".to_string());
        }
        parts.join(" · ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Resolution
    // =========================================================================

    #[test]
    fn test_resolution_rank_from_title() {
        assert_eq!(QualityProfile::parse("2160p release").resolution_rank(), 3);
        assert_eq!(QualityProfile::parse("1080p release").resolution_rank(), 2);
        assert_eq!(QualityProfile::parse("Movie.720p.WEB").resolution_rank(), 1);
        assert_eq!(QualityProfile::parse("no info").resolution_rank(), 0);
    }

    #[test]
    fn test_resolution_aliases() {
        assert_eq!(Resolution::from_title("Movie 4K HDR"), Resolution::Uhd2160);
        assert_eq!(Resolution::from_title("Movie.UHD.BluRay"), Resolution::Uhd2160);
        assert_eq!(Resolution::from_label("4k"), Resolution::Uhd2160);
        assert_eq!(Resolution::from_label("Full HD"), Resolution::Hd1080);
        assert_eq!(Resolution::from_label("hd"), Resolution::Hd720);
        assert_eq!(Resolution::from_label("weird"), Resolution::Unknown);
    }

    #[test]
    fn test_resolution_prefers_highest_token() {
        // Some titles carry both the source and the target resolution
        assert_eq!(
            Resolution::from_title("Movie 1080p upscaled 2160p"),
            Resolution::Uhd2160
        );
    }

    // =========================================================================
    // Dolby Vision
    // =========================================================================

    #[test]
    fn test_fel_detection() {
        let q = QualityProfile::parse("Movie 2160p DV Profile 7 FEL BL+EL+RPU Atmos");
        assert!(q.has_dolby_vision);
        assert_eq!(q.dolby_vision_profile, Some(7));
        assert!(q.dolby_vision_has_fel);
        assert!(q.has_atmos);
        assert_eq!(q.dynamic_range, DynamicRange::DolbyVision);
        assert!(q.is_p7_fel());
    }

    #[test]
    fn test_layer_pattern_implies_profile_7_fel() {
        let q = QualityProfile::parse("Movie.2019.2160p.UHD.BluRay.REMUX.BL+EL+RPU.TrueHD-GRP");
        assert_eq!(q.dolby_vision_profile, Some(7));
        assert!(q.dolby_vision_has_fel);
        assert_eq!(q.dv_tier(), DvTier::P7Fel);
    }

    #[test]
    fn test_mel_and_bl_el_without_rpu() {
        let mel = QualityProfile::parse("Movie 2160p DoVi P7 MEL");
        assert!(mel.has_dolby_vision);
        assert!(!mel.dolby_vision_has_fel);
        assert_eq!(mel.dv_tier(), DvTier::P7Mel);

        let bl_el = QualityProfile::parse("Movie 2160p BL+EL HEVC");
        assert_eq!(bl_el.dolby_vision_profile, Some(7));
        assert!(!bl_el.dolby_vision_has_fel);
    }

    #[test]
    fn test_profile_tokens() {
        assert_eq!(QualityProfile::parse("Movie DV P5 2160p").dolby_vision_profile, Some(5));
        assert_eq!(QualityProfile::parse("Movie profile7 2160p").dolby_vision_profile, Some(7));
        assert_eq!(QualityProfile::parse("Movie Dolby Vision Profile 8").dolby_vision_profile, Some(8));
        // A profile token alone still means Dolby Vision
        assert!(QualityProfile::parse("Movie P8 2160p").has_dolby_vision);
    }

    #[test]
    fn test_fel_ignored_for_non_7_profile() {
        let q = QualityProfile::parse("Movie DV P8 FEL");
        assert_eq!(q.dolby_vision_profile, Some(8));
        assert!(!q.dolby_vision_has_fel);
    }

    #[test]
    fn test_dv_without_profile() {
        let q = QualityProfile::parse("Movie.2021.2160p.WEB-DL.DV.HDR.H.265");
        assert!(q.has_dolby_vision);
        assert_eq!(q.dolby_vision_profile, None);
        assert_eq!(q.dv_tier(), DvTier::Basic);
        assert_eq!(q.dv_label(), "DV");
    }

    #[test]
    fn test_dvd_is_not_dolby_vision() {
        let q = QualityProfile::parse("Movie.1999.DVDRip.XviD");
        assert!(!q.has_dolby_vision);
        assert_eq!(q.dynamic_range, DynamicRange::None);
    }

    // =========================================================================
    // HDR / Atmos / malformed input
    // =========================================================================

    #[test]
    fn test_hdr10_dynamic_range() {
        assert_eq!(QualityProfile::parse("Movie 2160p HDR10 x265").dynamic_range, DynamicRange::Hdr10);
        assert_eq!(QualityProfile::parse("Movie 2160p HDR10+ x265").dynamic_range, DynamicRange::Hdr10);
        assert_eq!(QualityProfile::parse("Movie.2160p.HDR.x265").dynamic_range, DynamicRange::Hdr10);
        // HDRip is a source tag, not high dynamic range
        assert_eq!(QualityProfile::parse("Movie HDRip").dynamic_range, DynamicRange::None);
    }

    #[test]
    fn test_atmos_detection() {
        assert!(QualityProfile::parse("Movie.TrueHD.7.1.Atmos-GRP").has_atmos);
        assert!(QualityProfile::parse("Movie DDP5.1 ATMOS").has_atmos);
        assert!(!QualityProfile::parse("Movie DTS-HD MA 5.1").has_atmos);
    }

    #[test]
    fn test_malformed_titles_yield_unset_profile() {
        for title in ["", "   ", "???", "日本語のタイトル", "a+b+c"] {
            assert_eq!(QualityProfile::parse(title), QualityProfile::default(), "{title:?}");
        }
    }

    // =========================================================================
    // Construction from parts
    // =========================================================================

    #[test]
    fn test_from_parts_keeps_invariants() {
        let q = QualityProfile::from_parts(Resolution::Uhd2160, None, true, false, false);
        assert!(q.has_dolby_vision);
        assert_eq!(q.dolby_vision_profile, Some(7));

        let q = QualityProfile::from_parts(Resolution::Hd1080, Some(5), true, false, false);
        assert!(!q.dolby_vision_has_fel);

        let q = QualityProfile::from_parts(Resolution::Uhd2160, None, false, true, true);
        assert!(!q.has_dolby_vision);
        assert_eq!(q.dynamic_range, DynamicRange::Hdr10);
    }

    #[test]
    fn test_summary() {
        let q = QualityProfile::parse("Movie 2160p DV P7 FEL TrueHD Atmos");
        assert_eq!(q.summary(), "DV P7 FEL · 2160p · TrueHD Atmos");
        assert_eq!(QualityProfile::default().summary(), "HDR10/SDR");
    }
}
