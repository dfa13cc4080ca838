//! Audit trail of mutating operations.
//!
//! Every mutating application operation emits exactly one record, whether it
//! succeeded or was rejected. Snapshots are plain JSON so sinks stay
//! independent of the domain types.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use retailpos_core::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    Succeeded,
    Failed { reason: String },
}

impl AuditOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AuditOutcome::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    /// Operation name, e.g. `pos.sale.register`.
    pub action: String,
    /// Kind of entity the operation targets, e.g. `sales.order`.
    pub entity: String,
    pub entity_id: Option<String>,
    pub actor: UserId,
    pub before: Option<JsonValue>,
    pub after: Option<JsonValue>,
    pub outcome: AuditOutcome,
    pub recorded_at: DateTime<Utc>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn record(&self, record: AuditRecord) {
        (**self).record(record)
    }
}

/// Keeps records in memory for inspection.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn for_action(&self, action: &str) -> Vec<AuditRecord> {
        self.records().into_iter().filter(|r| r.action == action).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

/// Emits each record as a structured `tracing` event at target `audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        let before = record.before.as_ref().map(JsonValue::to_string);
        let after = record.after.as_ref().map(JsonValue::to_string);
        match &record.outcome {
            AuditOutcome::Succeeded => tracing::info!(
                target: "audit",
                action = %record.action,
                entity = %record.entity,
                entity_id = record.entity_id.as_deref(),
                actor = %record.actor,
                before,
                after,
                recorded_at = %record.recorded_at,
                "succeeded"
            ),
            AuditOutcome::Failed { reason } => tracing::warn!(
                target: "audit",
                action = %record.action,
                entity = %record.entity,
                entity_id = record.entity_id.as_deref(),
                actor = %record.actor,
                before,
                reason = %reason,
                recorded_at = %record.recorded_at,
                "failed"
            ),
        }
    }
}
