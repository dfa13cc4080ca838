use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use retailpos_core::{Aggregate, AggregateId, BranchId, VariantId};
use retailpos_events::{EventEnvelope, Subscription};
use retailpos_inventory::{InventoryEvent, StockLevels, StockRecord, StockRecordId};

use crate::read_model::BranchStore;

/// Current levels of one stock record, as seen by queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockLevelRow {
    pub record_id: StockRecordId,
    pub variant_id: VariantId,
    pub branch_id: BranchId,
    pub available: i64,
    pub reserved: i64,
    pub minimum: i64,
    pub maximum: i64,
}

impl StockLevelRow {
    pub fn reservable(&self) -> i64 {
        self.available - self.reserved
    }

    pub fn needs_replenishment(&self) -> bool {
        self.available <= self.minimum
    }
}

#[derive(Debug, Error)]
pub enum StockProjectionError {
    #[error("failed to deserialize inventory event: {0}")]
    Deserialize(String),

    #[error("event for unknown stock record {0} (provisioning not seen)")]
    UnknownRecord(AggregateId),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

#[derive(Debug, Default)]
struct ProjectionState {
    /// Last applied sequence number per stream.
    cursors: HashMap<AggregateId, u64>,
    /// Where each record lives, learned from `StockProvisioned`.
    branches: HashMap<AggregateId, BranchId>,
    /// Newest levels delivered ahead of their record's `StockProvisioned`.
    early: HashMap<AggregateId, (u64, StockLevels)>,
}

/// Stock levels per branch, fed by inventory envelopes.
///
/// Every inventory event carries the levels it produced, so applying an event
/// overwrites the row instead of accumulating deltas.
#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: BranchStore<StockRecordId, StockLevelRow>,
{
    store: S,
    state: RwLock<ProjectionState>,
}

impl<S> StockLevelsProjection<S>
where
    S: BranchStore<StockRecordId, StockLevelRow>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: RwLock::new(ProjectionState::default()),
        }
    }

    pub fn get(&self, branch_id: BranchId, record_id: &StockRecordId) -> Option<StockLevelRow> {
        self.store.get(branch_id, record_id)
    }

    pub fn list(&self, branch_id: BranchId) -> Vec<StockLevelRow> {
        self.store.list(branch_id)
    }

    /// Records of a branch at or below their minimum, lowest reservable first.
    pub fn low_stock(&self, branch_id: BranchId) -> Vec<StockLevelRow> {
        let mut rows: Vec<_> = self
            .store
            .list(branch_id)
            .into_iter()
            .filter(StockLevelRow::needs_replenishment)
            .collect();
        rows.sort_by_key(|r| (r.reservable(), *r.variant_id.as_uuid()));
        rows
    }

    /// Apply a published envelope.
    ///
    /// Envelopes of other aggregate types are skipped. Anything at or below the
    /// stream cursor is a duplicate or a late delivery and is ignored; a jump
    /// ahead is applied, since the newer levels supersede whatever was skipped.
    /// Levels that overtake their record's provisioning are held until it
    /// arrives and then seed the row.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), StockProjectionError> {
        if envelope.aggregate_type() != StockRecord::AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let Ok(mut state) = self.state.write() else {
            return Ok(());
        };

        let last = state.cursors.get(&aggregate_id).copied().unwrap_or(0);
        if seq == 0 {
            return Err(StockProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }

        let event: InventoryEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| StockProjectionError::Deserialize(e.to_string()))?;

        let applied = match &event {
            InventoryEvent::StockProvisioned(e) => {
                let (applied, levels) = match state.early.remove(&aggregate_id) {
                    Some((early_seq, levels)) if early_seq > seq => (early_seq, levels),
                    _ => (seq, StockLevels::default()),
                };
                state.branches.insert(aggregate_id, e.branch_id);
                self.store.upsert(
                    e.branch_id,
                    e.record_id,
                    StockLevelRow {
                        record_id: e.record_id,
                        variant_id: e.variant_id,
                        branch_id: e.branch_id,
                        available: levels.available,
                        reserved: levels.reserved,
                        minimum: e.minimum,
                        maximum: e.maximum,
                    },
                );
                applied
            }
            other => {
                let Some(branch_id) = state.branches.get(&aggregate_id).copied() else {
                    if let Some(levels) = other.levels() {
                        let newer = state.early.get(&aggregate_id).is_none_or(|(early_seq, _)| *early_seq < seq);
                        if newer {
                            state.early.insert(aggregate_id, (seq, levels));
                        }
                    }
                    return Ok(());
                };
                let record_id = StockRecordId::new(aggregate_id);
                let mut row = self
                    .store
                    .get(branch_id, &record_id)
                    .ok_or(StockProjectionError::UnknownRecord(aggregate_id))?;
                if let Some(levels) = other.levels() {
                    row.available = levels.available;
                    row.reserved = levels.reserved;
                }
                self.store.upsert(branch_id, record_id, row);
                seq
            }
        };

        state.cursors.insert(aggregate_id, applied);
        Ok(())
    }

    /// Apply everything currently queued on `subscription`. Returns how many
    /// envelopes were taken off the queue, or the first failure once the whole
    /// queue has been attempted.
    pub fn catch_up(&self, subscription: &Subscription<EventEnvelope<JsonValue>>) -> Result<usize, StockProjectionError> {
        let pending = subscription.drain();
        let mut first_error = None;
        for env in &pending {
            if let Err(e) = self.apply_envelope(env) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(pending.len()),
        }
    }

    /// Rebuild from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), StockProjectionError> {
        if let Ok(mut state) = self.state.write() {
            *state = ProjectionState::default();
        }
        self.store.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        // Deterministic replay order: aggregate, sequence.
        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}
