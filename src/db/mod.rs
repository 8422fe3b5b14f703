//! Persistent state, stored as JSON files under the data directory

pub mod json_file;
pub mod ledger;
pub mod pending;
pub mod scan_state;

pub use ledger::{JsonLedger, Ledger, LedgerOrigin};
pub use pending::{Claim, PendingDownload, PendingRepository, PendingStatus};
pub use scan_state::{LastRun, RunOutcome, ScanState, ScanStateRepository};
