//! Upgrade notification rules
//!
//! A flat JSON object of boolean toggles, e.g.
//!
//! ```json
//! { "notifyFelFromHdr": true, "notifyDvFromHdr": false }
//! ```
//!
//! Missing keys take their defaults; unknown keys are rejected.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::json_file;

/// Which quality transitions are worth a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RuleConfig {
    /// Notify about a P7 FEL release even when the library already has one
    pub notify_fel_duplicates: bool,
    pub notify_fel_from_hdr: bool,
    pub notify_fel_from_p5: bool,
    pub notify_dv_from_hdr: bool,
    pub notify_dv_profile_upgrades: bool,
    pub notify_atmos_only_if_no_atmos: bool,
    pub notify_atmos_with_dv_upgrade: bool,
    pub notify_resolution_only_upgrades: bool,
    /// Skip releases that cannot be matched to a library item
    pub notify_only_library_movies: bool,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            notify_fel_duplicates: false,
            notify_fel_from_hdr: true,
            notify_fel_from_p5: true,
            notify_dv_from_hdr: false,
            notify_dv_profile_upgrades: false,
            notify_atmos_only_if_no_atmos: false,
            notify_atmos_with_dv_upgrade: false,
            notify_resolution_only_upgrades: false,
            notify_only_library_movies: true,
        }
    }
}

impl RuleConfig {
    /// Every toggle on
    pub fn all_enabled() -> Self {
        Self {
            notify_fel_duplicates: true,
            notify_fel_from_hdr: true,
            notify_fel_from_p5: true,
            notify_dv_from_hdr: true,
            notify_dv_profile_upgrades: true,
            notify_atmos_only_if_no_atmos: true,
            notify_atmos_with_dv_upgrade: true,
            notify_resolution_only_upgrades: true,
            notify_only_library_movies: true,
        }
    }

    /// Load rules from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match json_file::read::<Self>(path)
            .with_context(|| format!("Invalid rule configuration in {}", path.display()))?
        {
            Some(rules) => {
                info!(path = %path.display(), "Loaded upgrade rules");
                Ok(rules)
            }
            None => {
                info!(path = %path.display(), "No rules file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Invalid rule configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let rules = RuleConfig::default();
        assert!(!rules.notify_fel_duplicates);
        assert!(rules.notify_fel_from_hdr);
        assert!(rules.notify_fel_from_p5);
        assert!(!rules.notify_dv_from_hdr);
        assert!(rules.notify_only_library_movies);
    }

    #[test]
    fn test_partial_object_fills_defaults() {
        let rules = RuleConfig::from_json(r#"{"notifyDvFromHdr": true, "notifyFelFromHdr": false}"#).unwrap();
        assert_eq!(
            rules,
            RuleConfig {
                notify_dv_from_hdr: true,
                notify_fel_from_hdr: false,
                ..RuleConfig::default()
            }
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(RuleConfig::from_json(r#"{"notifyEverything": true}"#).is_err());
        assert!(RuleConfig::from_json(r#"{"notifyDvFromHdr": "yes"}"#).is_err());
    }

    #[test]
    fn test_round_trip_uses_camel_case_keys() {
        let json = serde_json::to_value(RuleConfig::all_enabled()).unwrap();
        assert_eq!(json["notifyAtmosOnlyIfNoAtmos"], true);
        assert_eq!(json.as_object().unwrap().len(), 9);
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        assert_eq!(RuleConfig::load(&path).unwrap(), RuleConfig::default());

        std::fs::write(&path, "{ nope").unwrap();
        assert!(RuleConfig::load(&path).is_err());
    }
}
