use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use retailpos_core::money::div_round_half_up;
use retailpos_core::{
    Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, Money, StockShortfall, VariantId,
};
use retailpos_events::Event;

/// Stock record identifier.
///
/// Derived from the (variant, branch) pair, so there is exactly one stream per pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockRecordId(pub AggregateId);

impl StockRecordId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn for_pair(variant_id: VariantId, branch_id: BranchId) -> Self {
        Self(AggregateId::derived(
            StockRecord::AGGREGATE_TYPE,
            &[variant_id.as_uuid(), branch_id.as_uuid()],
        ))
    }
}

impl core::fmt::Display for StockRecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Quantities after an event was applied.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevels {
    pub available: i64,
    pub reserved: i64,
}

impl StockLevels {
    pub fn reservable(&self) -> i64 {
        self.available - self.reserved
    }
}

/// New average cost after receiving `quantity` units at `unit_cost`.
///
/// A zero (or negative) unit cost leaves the average untouched, so returns and
/// free samples don't dilute it. `None` when the stock level itself would
/// overflow.
pub fn weighted_average_cost(
    average_cost: Money,
    available_before: i64,
    unit_cost: Money,
    quantity: i64,
) -> Option<Money> {
    let units = available_before.checked_add(quantity)?;
    if !unit_cost.is_positive() || units <= 0 {
        return Some(average_cost);
    }
    let weighted = i128::from(average_cost.cents()) * i128::from(available_before)
        + i128::from(unit_cost.cents()) * i128::from(quantity);
    // A weighted mean lies between its inputs, so it fits whenever they do.
    i64::try_from(div_round_half_up(weighted, i128::from(units)))
        .ok()
        .map(Money::from_cents)
}

/// Aggregate root: the stock of one variant at one branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockRecord {
    id: StockRecordId,
    variant_id: Option<VariantId>,
    branch_id: Option<BranchId>,
    available: i64,
    reserved: i64,
    minimum: i64,
    maximum: i64,
    average_cost: Money,
    physical_location: Option<String>,
    last_movement_at: Option<DateTime<Utc>>,
    last_inbound_at: Option<DateTime<Utc>>,
    last_outbound_at: Option<DateTime<Utc>>,
    version: u64,
    #[serde(skip)]
    created: bool,
}

impl StockRecord {
    /// Create an empty, not-yet-provisioned aggregate instance for rehydration.
    pub fn empty(id: StockRecordId) -> Self {
        Self {
            id,
            variant_id: None,
            branch_id: None,
            available: 0,
            reserved: 0,
            minimum: 0,
            maximum: 0,
            average_cost: Money::ZERO,
            physical_location: None,
            last_movement_at: None,
            last_inbound_at: None,
            last_outbound_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn variant_id(&self) -> Option<VariantId> {
        self.variant_id
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn available(&self) -> i64 {
        self.available
    }

    pub fn reserved(&self) -> i64 {
        self.reserved
    }

    /// Units that can still be promised to a new sale.
    pub fn reservable(&self) -> i64 {
        self.available - self.reserved
    }

    pub fn minimum(&self) -> i64 {
        self.minimum
    }

    pub fn maximum(&self) -> i64 {
        self.maximum
    }

    pub fn average_cost(&self) -> Money {
        self.average_cost
    }

    pub fn physical_location(&self) -> Option<&str> {
        self.physical_location.as_deref()
    }

    pub fn last_movement_at(&self) -> Option<DateTime<Utc>> {
        self.last_movement_at
    }

    pub fn last_inbound_at(&self) -> Option<DateTime<Utc>> {
        self.last_inbound_at
    }

    pub fn last_outbound_at(&self) -> Option<DateTime<Utc>> {
        self.last_outbound_at
    }

    pub fn levels(&self) -> StockLevels {
        StockLevels {
            available: self.available,
            reserved: self.reserved,
        }
    }

    pub fn needs_replenishment(&self) -> bool {
        self.available <= self.minimum
    }

    pub fn is_overstocked(&self) -> bool {
        self.available >= self.maximum
    }
}

impl AggregateRoot for StockRecord {
    type Id = StockRecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ProvisionStock (creates the record at zero).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionStock {
    pub record_id: StockRecordId,
    pub variant_id: VariantId,
    pub branch_id: BranchId,
    pub minimum: i64,
    pub maximum: i64,
    pub physical_location: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub record_id: StockRecordId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseStock. Over-release is clamped to what is reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub record_id: StockRecordId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmReservation (reservation becomes a real deduction).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmReservation {
    pub record_id: StockRecordId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: IngestStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStock {
    pub record_id: StockRecordId,
    pub quantity: i64,
    pub unit_cost: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    Provision(ProvisionStock),
    Reserve(ReserveStock),
    Release(ReleaseStock),
    Confirm(ConfirmReservation),
    Ingest(IngestStock),
}

/// Event: StockProvisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockProvisioned {
    pub record_id: StockRecordId,
    pub variant_id: VariantId,
    pub branch_id: BranchId,
    pub minimum: i64,
    pub maximum: i64,
    pub physical_location: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub record_id: StockRecordId,
    pub quantity: i64,
    pub levels: StockLevels,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReleased. `quantity` is the clamped amount actually released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub record_id: StockRecordId,
    pub quantity: i64,
    pub levels: StockLevels,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationConfirmed {
    pub record_id: StockRecordId,
    pub quantity: i64,
    pub levels: StockLevels,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReceived {
    pub record_id: StockRecordId,
    pub quantity: i64,
    pub unit_cost: Money,
    pub average_cost: Money,
    pub levels: StockLevels,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    StockProvisioned(StockProvisioned),
    StockReserved(StockReserved),
    StockReleased(StockReleased),
    ReservationConfirmed(ReservationConfirmed),
    StockReceived(StockReceived),
}

impl InventoryEvent {
    /// Levels right after this event, if it changes quantities.
    pub fn levels(&self) -> Option<StockLevels> {
        match self {
            InventoryEvent::StockProvisioned(_) => Some(StockLevels::default()),
            InventoryEvent::StockReserved(e) => Some(e.levels),
            InventoryEvent::StockReleased(e) => Some(e.levels),
            InventoryEvent::ReservationConfirmed(e) => Some(e.levels),
            InventoryEvent::StockReceived(e) => Some(e.levels),
        }
    }
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::StockProvisioned(_) => "inventory.stock.provisioned",
            InventoryEvent::StockReserved(_) => "inventory.stock.reserved",
            InventoryEvent::StockReleased(_) => "inventory.stock.released",
            InventoryEvent::ReservationConfirmed(_) => "inventory.stock.reservation_confirmed",
            InventoryEvent::StockReceived(_) => "inventory.stock.received",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::StockProvisioned(e) => e.occurred_at,
            InventoryEvent::StockReserved(e) => e.occurred_at,
            InventoryEvent::StockReleased(e) => e.occurred_at,
            InventoryEvent::ReservationConfirmed(e) => e.occurred_at,
            InventoryEvent::StockReceived(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockRecord {
    const AGGREGATE_TYPE: &'static str = "inventory.stock_record";

    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::StockProvisioned(e) => {
                self.id = e.record_id;
                self.variant_id = Some(e.variant_id);
                self.branch_id = Some(e.branch_id);
                self.minimum = e.minimum;
                self.maximum = e.maximum;
                self.physical_location = e.physical_location.clone();
                self.created = true;
            }
            InventoryEvent::StockReserved(e) => {
                self.reserved += e.quantity;
                self.last_movement_at = Some(e.occurred_at);
            }
            InventoryEvent::StockReleased(e) => {
                self.reserved -= e.quantity;
                self.last_movement_at = Some(e.occurred_at);
            }
            InventoryEvent::ReservationConfirmed(e) => {
                self.reserved -= e.quantity;
                self.available -= e.quantity;
                self.last_movement_at = Some(e.occurred_at);
                self.last_outbound_at = Some(e.occurred_at);
            }
            InventoryEvent::StockReceived(e) => {
                self.available += e.quantity;
                self.average_cost = e.average_cost;
                self.last_movement_at = Some(e.occurred_at);
                self.last_inbound_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::Provision(cmd) => self.handle_provision(cmd),
            InventoryCommand::Reserve(cmd) => self.handle_reserve(cmd),
            InventoryCommand::Release(cmd) => self.handle_release(cmd),
            InventoryCommand::Confirm(cmd) => self.handle_confirm(cmd),
            InventoryCommand::Ingest(cmd) => self.handle_ingest(cmd),
        }
    }
}

impl StockRecord {
    fn ensure_exists(&self, record_id: StockRecordId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("stock record {record_id}")));
        }
        if self.id != record_id {
            return Err(DomainError::invalid_state("record_id mismatch"));
        }
        Ok(())
    }

    fn ensure_positive(quantity: i64) -> Result<(), DomainError> {
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        Ok(())
    }

    fn handle_provision(&self, cmd: &ProvisionStock) -> Result<Vec<InventoryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::invalid_state(format!(
                "variant {} is already stocked at branch {}",
                cmd.variant_id, cmd.branch_id
            )));
        }
        if cmd.record_id != StockRecordId::for_pair(cmd.variant_id, cmd.branch_id) {
            return Err(DomainError::validation("record_id does not match the variant/branch pair"));
        }
        if cmd.minimum < 0 {
            return Err(DomainError::validation("minimum cannot be negative"));
        }
        if cmd.maximum < cmd.minimum {
            return Err(DomainError::validation("maximum cannot be below minimum"));
        }
        Ok(vec![InventoryEvent::StockProvisioned(StockProvisioned {
            record_id: cmd.record_id,
            variant_id: cmd.variant_id,
            branch_id: cmd.branch_id,
            minimum: cmd.minimum,
            maximum: cmd.maximum,
            physical_location: cmd.physical_location.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<InventoryEvent>, DomainError> {
        Self::ensure_positive(cmd.quantity)?;
        self.ensure_exists(cmd.record_id)?;

        let reservable = self.reservable();
        if reservable < cmd.quantity {
            return Err(DomainError::InsufficientStock(self.shortfall(cmd.quantity)));
        }

        Ok(vec![InventoryEvent::StockReserved(StockReserved {
            record_id: cmd.record_id,
            quantity: cmd.quantity,
            levels: StockLevels {
                available: self.available,
                reserved: self.reserved + cmd.quantity,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseStock) -> Result<Vec<InventoryEvent>, DomainError> {
        Self::ensure_positive(cmd.quantity)?;
        self.ensure_exists(cmd.record_id)?;

        let released = cmd.quantity.min(self.reserved);
        if released == 0 {
            return Ok(Vec::new());
        }

        Ok(vec![InventoryEvent::StockReleased(StockReleased {
            record_id: cmd.record_id,
            quantity: released,
            levels: StockLevels {
                available: self.available,
                reserved: self.reserved - released,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmReservation) -> Result<Vec<InventoryEvent>, DomainError> {
        Self::ensure_positive(cmd.quantity)?;
        self.ensure_exists(cmd.record_id)?;

        if cmd.quantity > self.reserved {
            return Err(DomainError::invalid_state(format!(
                "cannot confirm {} units, only {} reserved",
                cmd.quantity, self.reserved
            )));
        }

        Ok(vec![InventoryEvent::ReservationConfirmed(ReservationConfirmed {
            record_id: cmd.record_id,
            quantity: cmd.quantity,
            levels: StockLevels {
                available: self.available - cmd.quantity,
                reserved: self.reserved - cmd.quantity,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ingest(&self, cmd: &IngestStock) -> Result<Vec<InventoryEvent>, DomainError> {
        Self::ensure_positive(cmd.quantity)?;
        self.ensure_exists(cmd.record_id)?;
        if cmd.unit_cost.is_negative() {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }
        let out_of_range = || {
            DomainError::validation(format!(
                "receiving {} units would take the stock of record {} out of range",
                cmd.quantity, cmd.record_id
            ))
        };
        let available = self.available.checked_add(cmd.quantity).ok_or_else(out_of_range)?;
        let average_cost = weighted_average_cost(self.average_cost, self.available, cmd.unit_cost, cmd.quantity)
            .ok_or_else(out_of_range)?;

        Ok(vec![InventoryEvent::StockReceived(StockReceived {
            record_id: cmd.record_id,
            quantity: cmd.quantity,
            unit_cost: cmd.unit_cost,
            average_cost,
            levels: StockLevels {
                available,
                reserved: self.reserved,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn shortfall(&self, requested: i64) -> StockShortfall {
        StockShortfall {
            variant_id: self.variant_id.unwrap_or_default(),
            branch_id: self.branch_id.unwrap_or_default(),
            requested,
            reservable: self.reservable(),
        }
    }
}
