//! Business logic services

pub mod approvals;
pub mod downloads;
pub mod fingerprint;
pub mod library;
pub mod logging;
pub mod notifications;
pub mod ranker;
pub mod upgrade_evaluator;

pub use approvals::{ApprovalAction, ApprovalDesk, ApprovalOutcome};
pub use downloads::{DownloadExecutor, DownloadSubmission, LogExecutor};
pub use fingerprint::{IdentifierSet, fingerprint};
pub use library::{JsonLibraryIndex, LibraryIndex, LibraryItem, LibraryMatch};
pub use logging::{ActivityEntry, ActivityLog, ActivityLogConfig, ActivityLogLayer};
pub use notifications::{
    BlockDelivery, DecidedListing, LogChannel, NotificationChannel, NotificationComposer,
};
pub use upgrade_evaluator::{Decision, Outcome, ReasonCode, UpgradeEvaluator};
