//! Notification composition and delivery
//!
//! [`NotificationComposer`] turns ranked, decided listings into message
//! blocks that each fit the channel's length limit. Entries are never split
//! across blocks. [`deliver_blocks`] sends the blocks one by one with a delay
//! in between and reports the outcome of every block.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::pending::PendingDownload;
use crate::indexer::Listing;
use crate::services::upgrade_evaluator::Decision;

/// Telegram's message limit, minus some room for formatting
pub const DEFAULT_MAX_LENGTH: usize = 4000;

/// Smallest configurable limit that still fits a header and a readable entry
pub const MIN_MAX_LENGTH: usize = 500;

const ENTRY_SEPARATOR: &str = "\n\n";
const ELLIPSIS: char = '…';

/// A listing together with the decision made about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecidedListing {
    pub listing: Listing,
    pub decision: Decision,
}

/// Builds length-bounded message blocks
#[derive(Debug, Clone)]
pub struct NotificationComposer {
    search_term: String,
    generated_at: DateTime<Utc>,
}

impl NotificationComposer {
    pub fn new(search_term: impl Into<String>, generated_at: DateTime<Utc>) -> Self {
        Self {
            search_term: search_term.into(),
            generated_at,
        }
    }

    /// Compose message blocks of at most `max_length` characters each.
    ///
    /// Entry order is preserved. An entry that cannot fit a block on its own
    /// is truncated. Returns nothing for an empty input.
    pub fn compose(&self, entries: &[DecidedListing], max_length: usize) -> Vec<String> {
        if entries.is_empty() || max_length == 0 {
            return Vec::new();
        }

        let header = truncate_chars(&self.header(entries.len()), max_length);
        let continued = truncate_chars(&self.continued_header(), max_length);

        let mut blocks = Vec::new();
        let mut current = header.clone();
        let mut current_len = char_len(&current);
        let mut has_entries = false;

        for entry in entries {
            let text = format_entry(entry);
            let needed = char_len(ENTRY_SEPARATOR) + char_len(&text);

            if current_len + needed <= max_length {
                current.push_str(ENTRY_SEPARATOR);
                current.push_str(&text);
                current_len += needed;
                has_entries = true;
                continue;
            }

            if has_entries {
                blocks.push(std::mem::take(&mut current));
                current = continued.clone();
                current_len = char_len(&current);
            }

            let room = max_length.saturating_sub(current_len + char_len(ENTRY_SEPARATOR));
            if room < entry_name_len(entry) {
                warn!(
                    name = %entry.listing.name,
                    room,
                    max_length,
                    "Entry does not fit the message limit, its name is cut"
                );
            }
            let text = truncate_chars(&text, room);
            if !text.is_empty() {
                current_len += char_len(ENTRY_SEPARATOR) + char_len(&text);
                current.push_str(ENTRY_SEPARATOR);
                current.push_str(&text);
            }
            has_entries = true;
        }

        blocks.push(current);
        blocks
    }

    fn header(&self, count: usize) -> String {
        format!(
            "IPTorrents: {} new release{} for \"{}\"\n{}",
            count,
            if count == 1 { "" } else { "s" },
            self.search_term,
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }

    fn continued_header(&self) -> String {
        format!("IPTorrents: \"{}\" (continued)", self.search_term)
    }
}

fn format_entry(entry: &DecidedListing) -> String {
    let listing = &entry.listing;
    let mut lines = vec![format!("• {}", listing.name)];

    let mut stats = Vec::new();
    if !listing.size_text.is_empty() {
        stats.push(format!("Size: {}", listing.size_text));
    }
    stats.push(format!("Seeders: {}", listing.seeders));
    stats.push(format!("Leechers: {}", listing.leechers));
    if let Some(added) = listing.added.as_deref().filter(|a| !a.is_empty()) {
        stats.push(format!("Added: {}", added));
    }
    lines.push(format!("  {}", stats.join(" | ")));

    lines.push(format!("  {}", entry.decision.reason_text));
    if !listing.link.is_empty() {
        lines.push(format!("  {}", listing.link));
    }
    lines.join("\n")
}

/// Length of the `• name` line that identifies an entry
fn entry_name_len(entry: &DecidedListing) -> usize {
    char_len("• ") + char_len(&entry.listing.name)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Cut `s` to at most `max` characters, marking the cut with an ellipsis
fn truncate_chars(s: &str, max: usize) -> String {
    if char_len(s) <= max {
        return s.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out: String = s.chars().take(max - 1).collect();
    out.push(ELLIPSIS);
    out
}

/// An external destination for notification messages
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one message block
    async fn send(&self, text: &str) -> Result<()>;

    /// Ask the operator to approve or decline a download
    async fn send_approval_request(&self, request: &PendingDownload) -> Result<()>;
}

/// Delivery result of a single block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockDelivery {
    Delivered,
    Failed(String),
}

impl BlockDelivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, BlockDelivery::Delivered)
    }
}

/// Send every block, pausing `delay` between sends.
///
/// A failed block does not stop the remaining ones.
pub async fn deliver_blocks(
    channel: &dyn NotificationChannel,
    blocks: &[String],
    delay: Duration,
) -> Vec<BlockDelivery> {
    let mut outcomes = Vec::with_capacity(blocks.len());

    for (index, block) in blocks.iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match channel.send(block).await {
            Ok(()) => {
                info!(channel = channel.name(), block = index + 1, total = blocks.len(), "Notification delivered");
                outcomes.push(BlockDelivery::Delivered);
            }
            Err(e) => {
                warn!(channel = channel.name(), block = index + 1, total = blocks.len(), error = %format!("{:#}", e), "Notification delivery failed");
                outcomes.push(BlockDelivery::Failed(format!("{:#}", e)));
            }
        }
    }

    outcomes
}

/// Channel that writes messages to the log instead of an external service
#[derive(Debug, Default, Clone)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, text: &str) -> Result<()> {
        info!(target: "notifications", text = %text, "Notification");
        Ok(())
    }

    async fn send_approval_request(&self, request: &PendingDownload) -> Result<()> {
        info!(
            target: "notifications",
            request_id = %request.request_id,
            title = %request.title,
            reason = %request.reason,
            approve = %request.approve_callback(),
            decline = %request.decline_callback(),
            "Approval requested"
        );
        Ok(())
    }
}
