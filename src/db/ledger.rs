//! Known-item ledger: the durable set of identifiers already seen
//!
//! Persisted as a JSON array of identifier strings. A string-keyed object
//! (`{"<id>": true, ...}`) is also accepted on load. Every insert rewrites the
//! whole file atomically before returning.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::db::json_file;
use crate::services::fingerprint::IdentifierSet;

/// How the ledger state was obtained at load time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOrigin {
    /// No persisted state existed; an empty ledger was created
    Created,
    /// Loaded from disk
    Loaded,
    /// Persisted state was unreadable and has been replaced by an empty set
    Recovered,
}

/// Membership store for listing identifiers
pub trait Ledger: Send + Sync {
    /// True if either identifier of the set has been recorded
    fn contains(&self, ids: &IdentifierSet) -> bool;

    /// Record a listing and persist before returning
    fn add(&mut self, ids: &IdentifierSet) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn origin(&self) -> LedgerOrigin;
}

/// File-backed [`Ledger`]
#[derive(Debug)]
pub struct JsonLedger {
    path: PathBuf,
    ids: HashSet<String>,
    origin: LedgerOrigin,
}

impl JsonLedger {
    /// Load the ledger at `path`, creating and persisting an empty one if absent.
    ///
    /// Corrupt state is logged and treated as empty. Only a failure to
    /// create the initial file is returned as an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        match json_file::read::<Value>(&path) {
            Ok(Some(value)) => match parse_ids(&value) {
                Some(ids) => {
                    info!(path = %path.display(), count = ids.len(), "Loaded known-item ledger");
                    Ok(Self {
                        path,
                        ids,
                        origin: LedgerOrigin::Loaded,
                    })
                }
                None => {
                    warn!(path = %path.display(), "Ledger has an unexpected shape, starting empty");
                    Ok(Self::recovered(path))
                }
            },
            Ok(None) => {
                let ledger = Self {
                    path,
                    ids: HashSet::new(),
                    origin: LedgerOrigin::Created,
                };
                ledger
                    .persist()
                    .context("Failed to create known-item ledger")?;
                info!(path = %ledger.path.display(), "Created empty known-item ledger");
                Ok(ledger)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{:#}", e), "Ledger unreadable, starting empty");
                Ok(Self::recovered(path))
            }
        }
    }

    fn recovered(path: PathBuf) -> Self {
        Self {
            path,
            ids: HashSet::new(),
            origin: LedgerOrigin::Recovered,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        let mut ids: Vec<&String> = self.ids.iter().collect();
        ids.sort();
        json_file::write_atomic(&self.path, &ids)
            .with_context(|| format!("Failed to persist ledger to {}", self.path.display()))
    }
}

impl Ledger for JsonLedger {
    fn contains(&self, ids: &IdentifierSet) -> bool {
        self.ids.contains(&ids.primary) || self.ids.contains(&ids.legacy)
    }

    fn add(&mut self, ids: &IdentifierSet) -> Result<()> {
        let inserted: Vec<&str> = ids
            .distinct()
            .into_iter()
            .filter(|id| self.ids.insert(id.to_string()))
            .collect();
        if inserted.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.persist() {
            // Roll back so memory never claims more than disk
            for id in inserted {
                self.ids.remove(id);
            }
            return Err(e);
        }
        debug!(primary = %ids.primary, total = self.ids.len(), "Ledger updated");
        Ok(())
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn origin(&self) -> LedgerOrigin {
        self.origin
    }
}

/// Accept either an array of strings or a string-keyed object
fn parse_ids(value: &Value) -> Option<HashSet<String>> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        Value::Object(map) => Some(map.keys().cloned().collect()),
        _ => None,
    }
}
