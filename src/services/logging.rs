//! Operator activity log: a bounded in-memory ring with live subscriptions.
//!
//! Scan decisions, skips and errors are recorded through [`ActivityLog`].
//! [`ActivityLogLayer`] is installed on the tracing subscriber in main so
//! warnings and errors logged anywhere else in the process end up in the
//! same log.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use uuid::Uuid;

/// Target used for events emitted by [`ActivityLog`] itself
pub const ACTIVITY_TARGET: &str = "activity";

#[derive(Debug, Clone)]
pub struct ActivityLogConfig {
    /// Maximum number of retained entries
    pub capacity: usize,
    pub broadcast_capacity: usize,
}

impl Default for ActivityLogConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            broadcast_capacity: 256,
        }
    }
}

/// One operator-visible log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    /// Category such as `scan`, `decision`, `approval`, or the tracing target
    pub kind: String,
    pub message: String,
    pub fields: Option<JsonValue>,
}

struct Inner {
    entries: Mutex<VecDeque<ActivityEntry>>,
    capacity: usize,
    broadcast_tx: broadcast::Sender<ActivityEntry>,
}

/// Append-only, size-bounded activity log. Cheap to clone.
#[derive(Clone)]
pub struct ActivityLog {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLog")
            .field("capacity", &self.inner.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self::with_config(ActivityLogConfig {
            capacity,
            ..Default::default()
        })
    }

    pub fn with_config(config: ActivityLogConfig) -> Self {
        let (broadcast_tx, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(VecDeque::with_capacity(config.capacity.min(1024))),
                capacity: config.capacity.max(1),
                broadcast_tx,
            }),
        }
    }

    pub fn record(&self, kind: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(target: ACTIVITY_TARGET, kind, "{}", message);
        self.push(Level::INFO, kind, message, None);
    }

    pub fn record_warn(&self, kind: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(target: ACTIVITY_TARGET, kind, "{}", message);
        self.push(Level::WARN, kind, message, None);
    }

    pub fn record_error(&self, kind: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(target: ACTIVITY_TARGET, kind, "{}", message);
        self.push(Level::ERROR, kind, message, None);
    }

    fn push(&self, level: Level, kind: &str, message: String, fields: Option<JsonValue>) {
        let entry = ActivityEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level: level.as_str().to_uppercase(),
            kind: kind.to_string(),
            message,
            fields,
        };

        {
            let mut entries = self.inner.entries.lock();
            while entries.len() >= self.inner.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        // No subscribers is fine
        let _ = self.inner.broadcast_tx.send(entry);
    }

    /// Retained entries, oldest first
    pub fn snapshot(&self) -> Vec<ActivityEntry> {
        self.inner.entries.lock().iter().cloned().collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEntry> {
        self.inner.broadcast_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Tracing layer that mirrors warnings and errors into this log
    pub fn layer(&self) -> ActivityLogLayer {
        ActivityLogLayer {
            log: self.clone(),
            min_level: Level::WARN,
        }
    }
}

/// Copies WARN/ERROR events from every target except [`ACTIVITY_TARGET`]
#[derive(Clone)]
pub struct ActivityLogLayer {
    log: ActivityLog,
    min_level: Level,
}

struct FieldVisitor {
    fields: HashMap<String, JsonValue>,
    message: Option<String>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            fields: HashMap::new(),
            message: None,
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let value_str = format!("{:?}", value);
        if field.name() == "message" {
            self.message = Some(value_str);
        } else {
            self.fields
                .insert(field.name().to_string(), JsonValue::String(value_str));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(
                field.name().to_string(),
                JsonValue::String(value.to_string()),
            );
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), JsonValue::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), JsonValue::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), JsonValue::Bool(value));
    }
}

impl<S> Layer<S> for ActivityLogLayer
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.min_level || metadata.target() == ACTIVITY_TARGET {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        let fields = if visitor.fields.is_empty() {
            None
        } else {
            serde_json::to_value(&visitor.fields).ok()
        };

        self.log.push(
            *metadata.level(),
            metadata.target(),
            visitor.message.unwrap_or_default(),
            fields,
        );
    }
}
