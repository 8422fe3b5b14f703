//! Upgrade decision engine
//!
//! Compares a candidate release's [`QualityProfile`] against the baseline the
//! library already holds and decides whether it is worth a notification.
//! Rules are evaluated in a fixed priority order and the first one that both
//! applies and is enabled in [`RuleConfig`] wins. A rule whose toggle is off
//! falls through to the next one.
//!
//! Pure and total: every input produces exactly one [`Decision`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::rules::RuleConfig;
use crate::torrent::quality::QualityProfile;

/// Whether a candidate should be surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Notify,
    Skip,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Notify => write!(f, "notify"),
            Outcome::Skip => write!(f, "skip"),
        }
    }
}

/// Machine-readable reason attached to every decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonCode {
    #[serde(rename = "NOT_IN_LIBRARY")]
    NotInLibrary,
    #[serde(rename = "DUPLICATE")]
    Duplicate,
    #[serde(rename = "DUPLICATE_FEL_REQUESTED")]
    DuplicateFelRequested,
    #[serde(rename = "HDR_TO_P7FEL")]
    HdrToP7Fel,
    #[serde(rename = "P5_TO_P7FEL")]
    P5ToP7Fel,
    #[serde(rename = "HDR_TO_DV")]
    HdrToDv,
    #[serde(rename = "DV_PROFILE_UPGRADE")]
    DvProfileUpgrade,
    #[serde(rename = "ATMOS_ADDED")]
    AtmosAdded,
    #[serde(rename = "ATMOS_AND_DV_UPGRADE")]
    AtmosAndDvUpgrade,
    #[serde(rename = "RESOLUTION_UPGRADE")]
    ResolutionUpgrade,
    #[serde(rename = "NO_UPGRADE")]
    NoUpgrade,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::NotInLibrary => "NOT_IN_LIBRARY",
            ReasonCode::Duplicate => "DUPLICATE",
            ReasonCode::DuplicateFelRequested => "DUPLICATE_FEL_REQUESTED",
            ReasonCode::HdrToP7Fel => "HDR_TO_P7FEL",
            ReasonCode::P5ToP7Fel => "P5_TO_P7FEL",
            ReasonCode::HdrToDv => "HDR_TO_DV",
            ReasonCode::DvProfileUpgrade => "DV_PROFILE_UPGRADE",
            ReasonCode::AtmosAdded => "ATMOS_ADDED",
            ReasonCode::AtmosAndDvUpgrade => "ATMOS_AND_DV_UPGRADE",
            ReasonCode::ResolutionUpgrade => "RESOLUTION_UPGRADE",
            ReasonCode::NoUpgrade => "NO_UPGRADE",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of comparing one candidate against its baseline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub outcome: Outcome,
    pub reason_code: ReasonCode,
    pub reason_text: String,
}

impl Decision {
    fn notify(reason_code: ReasonCode, reason_text: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Notify,
            reason_code,
            reason_text: reason_text.into(),
        }
    }

    fn skip(reason_code: ReasonCode, reason_text: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Skip,
            reason_code,
            reason_text: reason_text.into(),
        }
    }

    pub fn should_notify(&self) -> bool {
        self.outcome == Outcome::Notify
    }
}

/// Decide whether `candidate` is a notify-worthy upgrade over `baseline`.
///
/// `baseline` is `None` when the release could not be matched to a library
/// item. Unless rules restrict notifications to library titles, such a
/// candidate is compared against an all-unset profile.
pub fn decide(
    candidate: &QualityProfile,
    baseline: Option<&QualityProfile>,
    rules: &RuleConfig,
) -> Decision {
    let unknown = QualityProfile::default();
    let baseline = match baseline {
        Some(b) => b,
        None if rules.notify_only_library_movies => {
            return Decision::skip(ReasonCode::NotInLibrary, "Not in library");
        }
        None => &unknown,
    };

    if is_duplicate(candidate, baseline) {
        if rules.notify_fel_duplicates && candidate.is_p7_fel() && baseline.is_p7_fel() {
            return Decision::notify(
                ReasonCode::DuplicateFelRequested,
                "Additional P7 FEL copy (per settings)",
            );
        }
        return Decision::skip(ReasonCode::Duplicate, "Already have this exact quality");
    }

    if !baseline.has_dolby_vision && candidate.is_p7_fel() && rules.notify_fel_from_hdr {
        return Decision::notify(ReasonCode::HdrToP7Fel, "Upgrade: HDR10/SDR → P7 FEL");
    }

    if baseline.has_dolby_vision
        && baseline.dolby_vision_profile != Some(7)
        && candidate.is_p7_fel()
        && rules.notify_fel_from_p5
    {
        return Decision::notify(
            ReasonCode::P5ToP7Fel,
            format!("Upgrade: {} → P7 FEL", baseline.dv_label()),
        );
    }

    if !baseline.has_dolby_vision && candidate.has_dolby_vision && rules.notify_dv_from_hdr {
        return Decision::notify(
            ReasonCode::HdrToDv,
            format!("Upgrade: No DV → {}", candidate.dv_label()),
        );
    }

    let dv_upgrade = candidate.dv_tier() > baseline.dv_tier();

    if baseline.has_dolby_vision && dv_upgrade && rules.notify_dv_profile_upgrades {
        return Decision::notify(
            ReasonCode::DvProfileUpgrade,
            format!("Upgrade: {} → {}", baseline.dv_label(), candidate.dv_label()),
        );
    }

    if !baseline.has_atmos && candidate.has_atmos && rules.notify_atmos_only_if_no_atmos {
        if dv_upgrade && rules.notify_atmos_with_dv_upgrade {
            return Decision::notify(
                ReasonCode::AtmosAndDvUpgrade,
                format!(
                    "Combo upgrade: {} → {} + Atmos",
                    baseline.dv_label(),
                    candidate.dv_label()
                ),
            );
        }
        return Decision::notify(ReasonCode::AtmosAdded, "Added: TrueHD Atmos");
    }

    if candidate.resolution_rank() > baseline.resolution_rank()
        && rules.notify_resolution_only_upgrades
    {
        return Decision::notify(
            ReasonCode::ResolutionUpgrade,
            format!("Upgrade: {} → {}", baseline.resolution, candidate.resolution),
        );
    }

    Decision::skip(
        ReasonCode::NoUpgrade,
        "Not an upgrade per notification settings",
    )
}

/// Same DV presence, profile, FEL flag, Atmos and resolution tier
fn is_duplicate(a: &QualityProfile, b: &QualityProfile) -> bool {
    a.has_dolby_vision == b.has_dolby_vision
        && a.dolby_vision_profile == b.dolby_vision_profile
        && a.dolby_vision_has_fel == b.dolby_vision_has_fel
        && a.has_atmos == b.has_atmos
        && a.resolution_rank() == b.resolution_rank()
}

/// Holds the rules loaded for a run
#[derive(Debug, Clone)]
pub struct UpgradeEvaluator {
    rules: RuleConfig,
}

impl UpgradeEvaluator {
    pub fn new(rules: RuleConfig) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleConfig {
        &self.rules
    }

    pub fn decide(&self, candidate: &QualityProfile, baseline: Option<&QualityProfile>) -> Decision {
        decide(candidate, baseline, &self.rules)
    }
}
