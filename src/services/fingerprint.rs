//! Stable identity hashes for scraped listings
//!
//! Every listing gets two identifiers: a `primary` one over its canonical
//! link (or name, size and added time when it has no link) and a `legacy`
//! one over the name alone. Older ledgers only stored name hashes, so
//! membership is checked against both.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::indexer::{Listing, resolve_link};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentifierSet {
    pub primary: String,
    pub legacy: String,
}

impl IdentifierSet {
    /// Identifiers to store; `legacy` is omitted when it equals `primary`
    pub fn distinct(&self) -> Vec<&str> {
        if self.primary == self.legacy {
            vec![self.primary.as_str()]
        } else {
            vec![self.primary.as_str(), self.legacy.as_str()]
        }
    }
}

/// Compute the identifier set of a listing
pub fn fingerprint(listing: &Listing, base: &Url) -> IdentifierSet {
    IdentifierSet {
        primary: hash_string(&primary_source(listing, base)),
        legacy: hash_string(listing.name.trim()),
    }
}

fn primary_source(listing: &Listing, base: &Url) -> String {
    let link = listing.link.trim();
    if !link.is_empty() {
        if link.starts_with('/') {
            if let Some(resolved) = resolve_link(link, base) {
                return resolved;
            }
        }
        return link.to_string();
    }

    format!(
        "{}|{}|{}",
        listing.name, listing.size_text, listing.added_raw
    )
}

/// Hex SHA-256 of a string
pub fn hash_string(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}
