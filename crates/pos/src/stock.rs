//! Branch stock: provisioning records, receiving goods, and reading levels.

use chrono::Utc;
use serde_json::Value as JsonValue;

use retailpos_auth::Permission;
use retailpos_core::{Aggregate, BranchId, Money, UserId, VariantId};
use retailpos_events::{EventBus, EventEnvelope};
use retailpos_infra::event_store::EventStore;
use retailpos_infra::projections::StockLevelRow;
use retailpos_inventory::{IngestStock, InventoryCommand, ProvisionStock, StockRecord, StockRecordId};

use crate::error::PosError;
use crate::service::{AuditScope, PosService};

#[derive(Debug, Clone)]
pub struct ProvisionStockRequest {
    pub variant_id: VariantId,
    pub branch_id: BranchId,
    /// Defaults to the configured minimum.
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
    pub physical_location: Option<String>,
}

impl ProvisionStockRequest {
    pub fn new(variant_id: VariantId, branch_id: BranchId) -> Self {
        Self {
            variant_id,
            branch_id,
            minimum: None,
            maximum: None,
            physical_location: None,
        }
    }
}

impl<S, B> PosService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Start tracking a variant at a branch. Each pair gets exactly one record.
    pub fn provision_stock(&self, actor_id: UserId, request: ProvisionStockRequest) -> Result<StockRecord, PosError> {
        let record_id = StockRecordId::for_pair(request.variant_id, request.branch_id);
        let scope = AuditScope::new("pos.stock.provision", StockRecord::AGGREGATE_TYPE, actor_id).entity_id(record_id.0);
        let result = self.try_provision_stock(actor_id, record_id, &request);
        self.audited(scope, result)
    }

    fn try_provision_stock(
        &self,
        actor_id: UserId,
        record_id: StockRecordId,
        request: &ProvisionStockRequest,
    ) -> Result<StockRecord, PosError> {
        self.authorized(actor_id, &Permission::STOCK_MANAGE)?;
        if self.ports.branches.resolve(request.branch_id).is_none() {
            return Err(PosError::not_found(format!("branch {}", request.branch_id)));
        }
        if self.ports.catalog.resolve(request.variant_id).is_none() {
            return Err(PosError::not_found(format!("variant {}", request.variant_id)));
        }

        self.with_retry("provision_stock", || {
            let mut record = self.load_stock(record_id)?;
            let mut unit = self.dispatcher.begin();
            unit.execute(
                &mut record,
                InventoryCommand::Provision(ProvisionStock {
                    record_id,
                    variant_id: request.variant_id,
                    branch_id: request.branch_id,
                    minimum: request.minimum.unwrap_or(self.config.default_stock_minimum),
                    maximum: request.maximum.unwrap_or(self.config.default_stock_maximum),
                    physical_location: request.physical_location.clone(),
                    occurred_at: Utc::now(),
                }),
            )?;
            self.commit(unit)?;
            Ok(record.into_state())
        })
    }

    /// Goods arrived at a branch. Updates the weighted average cost.
    pub fn receive_stock(
        &self,
        actor_id: UserId,
        variant_id: VariantId,
        branch_id: BranchId,
        quantity: i64,
        unit_cost: Money,
    ) -> Result<StockRecord, PosError> {
        let record_id = StockRecordId::for_pair(variant_id, branch_id);
        let scope = AuditScope::new("pos.stock.receive", StockRecord::AGGREGATE_TYPE, actor_id)
            .entity_id(record_id.0)
            .before(self.load_stock(record_id).ok().as_ref().and_then(Self::snapshot));

        let result = self.authorized(actor_id, &Permission::STOCK_MANAGE).and_then(|_| {
            self.with_retry("receive_stock", || {
                let mut record = self.load_stock(record_id)?;
                let mut unit = self.dispatcher.begin();
                unit.execute(
                    &mut record,
                    InventoryCommand::Ingest(IngestStock { record_id, quantity, unit_cost, occurred_at: Utc::now() }),
                )?;
                self.commit(unit)?;
                Ok(record.into_state())
            })
        });

        self.audited(scope, result)
    }

    /// Authoritative record for a pair, read from its stream.
    pub fn stock_record(&self, variant_id: VariantId, branch_id: BranchId) -> Result<StockRecord, PosError> {
        let record = self.load_stock(StockRecordId::for_pair(variant_id, branch_id))?.into_state();
        if !record.exists() {
            return Err(PosError::not_found(format!(
                "no stock record for variant {variant_id} at branch {branch_id}"
            )));
        }
        Ok(record)
    }

    /// Projected levels of every record at a branch.
    pub fn branch_stock(&self, branch_id: BranchId) -> Vec<StockLevelRow> {
        self.refresh_stock_levels();
        self.stock_levels().list(branch_id)
    }

    /// Records at or below their minimum, lowest reservable first.
    pub fn low_stock(&self, branch_id: BranchId) -> Vec<StockLevelRow> {
        self.refresh_stock_levels();
        self.stock_levels().low_stock(branch_id)
    }
}
