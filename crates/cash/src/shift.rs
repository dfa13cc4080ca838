use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use retailpos_core::{
    Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, Money, PaymentMethod, UserId,
    ValueObject,
};
use retailpos_events::Event;

use crate::movement::{CashMovement, MovementId, MovementKind, Settlement, ShiftTotals};
use crate::register::RegisterId;

/// Cash shift identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShiftId(pub AggregateId);

impl ShiftId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ShiftId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftStatus {
    Open,
    Closed,
}

/// How many notes/coins of one face value were counted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenominationCount {
    pub face_value: Money,
    pub count: u32,
}

impl ValueObject for DenominationCount {}

/// A drawer count broken down by denomination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashCount {
    pub lines: Vec<DenominationCount>,
}

impl ValueObject for CashCount {}

impl CashCount {
    pub fn new(lines: Vec<DenominationCount>) -> Self {
        Self { lines }
    }

    /// `None` if the count does not fit in [`Money`].
    pub fn total(&self) -> Option<Money> {
        self.lines.iter().try_fold(Money::ZERO, |acc, l| {
            acc.checked_add(l.face_value.checked_times(i64::from(l.count))?)
        })
    }

    /// Face values must be positive and the count must add up to `declared`.
    pub fn validate_against(&self, declared: Money) -> Result<(), DomainError> {
        if self.lines.iter().any(|l| !l.face_value.is_positive()) {
            return Err(DomainError::validation("denomination face values must be positive"));
        }
        let total = self
            .total()
            .ok_or_else(|| DomainError::validation("cash count is out of range"))?;
        if total != declared {
            return Err(DomainError::validation(format!(
                "cash count adds up to {total}, declared amount is {declared}"
            )));
        }
        Ok(())
    }
}

/// Closing figures, frozen once the shift is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftClosing {
    pub counted: Money,
    pub expected: Money,
    /// `counted - expected`.
    pub difference: Money,
    /// Difference beyond the tolerance in force when the shift was closed.
    pub out_of_balance: bool,
    pub count: Option<CashCount>,
    pub closed_by: UserId,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorNote {
    pub supervisor_id: UserId,
    pub note: String,
    pub noted_at: DateTime<Utc>,
}

/// Aggregate root: CashShift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CashShift {
    id: ShiftId,
    register_id: Option<RegisterId>,
    branch_id: Option<BranchId>,
    cashier_id: Option<UserId>,
    status: ShiftStatus,
    opening_amount: Money,
    opening_count: Option<CashCount>,
    opened_at: Option<DateTime<Utc>>,
    observations: Vec<String>,
    totals: ShiftTotals,
    movements: Vec<CashMovement>,
    settlements: Vec<Settlement>,
    closing: Option<ShiftClosing>,
    annotations: Vec<SupervisorNote>,
    version: u64,
    #[serde(skip)]
    created: bool,
}

impl CashShift {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: ShiftId) -> Self {
        Self {
            id,
            register_id: None,
            branch_id: None,
            cashier_id: None,
            status: ShiftStatus::Open,
            opening_amount: Money::ZERO,
            opening_count: None,
            opened_at: None,
            observations: Vec::new(),
            totals: ShiftTotals::default(),
            movements: Vec::new(),
            settlements: Vec::new(),
            closing: None,
            annotations: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn register_id(&self) -> Option<RegisterId> {
        self.register_id
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn cashier_id(&self) -> Option<UserId> {
        self.cashier_id
    }

    pub fn status(&self) -> ShiftStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.created && self.status == ShiftStatus::Open
    }

    pub fn opening_amount(&self) -> Money {
        self.opening_amount
    }

    pub fn opening_count(&self) -> Option<&CashCount> {
        self.opening_count.as_ref()
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn observations(&self) -> &[String] {
        &self.observations
    }

    pub fn totals(&self) -> &ShiftTotals {
        &self.totals
    }

    pub fn movements(&self) -> &[CashMovement] {
        &self.movements
    }

    pub fn settlements(&self) -> &[Settlement] {
        &self.settlements
    }

    pub fn settlement_for(&self, movement_id: MovementId) -> Option<&Settlement> {
        self.settlements.iter().find(|s| s.movement_id == movement_id)
    }

    /// Whether a movement's money has reached the totals.
    pub fn is_settled(&self, movement: &CashMovement) -> bool {
        movement.kind.settles_on_entry() || self.settlement_for(movement.id).is_some()
    }

    pub fn closing(&self) -> Option<&ShiftClosing> {
        self.closing.as_ref()
    }

    pub fn annotations(&self) -> &[SupervisorNote] {
        &self.annotations
    }

    /// Cash that should be in the drawer right now. Recording refuses any
    /// entry that would take this out of range.
    pub fn expected_cash(&self) -> Money {
        self.totals
            .checked_expected_cash(self.opening_amount)
            .unwrap_or(self.opening_amount)
    }

    /// The sale movement registered for an order, if any.
    pub fn sale_movement(&self, order_id: AggregateId) -> Option<&CashMovement> {
        self.movements
            .iter()
            .find(|m| m.kind == MovementKind::Sale && m.order_id == Some(order_id))
    }
}

impl AggregateRoot for CashShift {
    type Id = ShiftId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenShift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenShift {
    pub shift_id: ShiftId,
    pub register_id: RegisterId,
    pub branch_id: BranchId,
    pub cashier_id: UserId,
    pub opening_amount: Money,
    pub opening_count: Option<CashCount>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordMovement.
///
/// Sale movements are recorded unsettled; every other kind is settled on entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMovement {
    pub shift_id: ShiftId,
    pub movement_id: MovementId,
    pub order_id: Option<AggregateId>,
    pub kind: MovementKind,
    pub concept: String,
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub authorized_by: Option<UserId>,
    pub recorded_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SettleSale (payment for an order was confirmed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleSale {
    pub shift_id: ShiftId,
    pub order_id: AggregateId,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseShift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseShift {
    pub shift_id: ShiftId,
    pub counted: Money,
    pub count: Option<CashCount>,
    pub notes: Option<String>,
    pub tolerance: Money,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AnnotateShift (supervisor note on a closed shift).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotateShift {
    pub shift_id: ShiftId,
    pub supervisor_id: UserId,
    pub note: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftCommand {
    Open(OpenShift),
    RecordMovement(RecordMovement),
    SettleSale(SettleSale),
    Close(CloseShift),
    Annotate(AnnotateShift),
}

/// Event: ShiftOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftOpened {
    pub shift_id: ShiftId,
    pub register_id: RegisterId,
    pub branch_id: BranchId,
    pub cashier_id: UserId,
    pub opening_amount: Money,
    pub opening_count: Option<CashCount>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub movement: CashMovement,
}

/// Event: SaleSettled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleSettled {
    pub shift_id: ShiftId,
    pub settlement: Settlement,
}

/// Event: ShiftClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftClosed {
    pub shift_id: ShiftId,
    pub closing: ShiftClosing,
    pub notes: Option<String>,
}

/// Event: ShiftAnnotated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftAnnotated {
    pub shift_id: ShiftId,
    pub note: SupervisorNote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftEvent {
    ShiftOpened(ShiftOpened),
    MovementRecorded(MovementRecorded),
    SaleSettled(SaleSettled),
    ShiftClosed(ShiftClosed),
    ShiftAnnotated(ShiftAnnotated),
}

impl Event for ShiftEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ShiftEvent::ShiftOpened(_) => "cash.shift.opened",
            ShiftEvent::MovementRecorded(_) => "cash.shift.movement_recorded",
            ShiftEvent::SaleSettled(_) => "cash.shift.sale_settled",
            ShiftEvent::ShiftClosed(_) => "cash.shift.closed",
            ShiftEvent::ShiftAnnotated(_) => "cash.shift.annotated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ShiftEvent::ShiftOpened(e) => e.occurred_at,
            ShiftEvent::MovementRecorded(e) => e.movement.recorded_at,
            ShiftEvent::SaleSettled(e) => e.settlement.settled_at,
            ShiftEvent::ShiftClosed(e) => e.closing.closed_at,
            ShiftEvent::ShiftAnnotated(e) => e.note.noted_at,
        }
    }
}

impl Aggregate for CashShift {
    const AGGREGATE_TYPE: &'static str = "cash.shift";

    type Command = ShiftCommand;
    type Event = ShiftEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ShiftEvent::ShiftOpened(e) => {
                self.id = e.shift_id;
                self.register_id = Some(e.register_id);
                self.branch_id = Some(e.branch_id);
                self.cashier_id = Some(e.cashier_id);
                self.status = ShiftStatus::Open;
                self.opening_amount = e.opening_amount;
                self.opening_count = e.opening_count.clone();
                self.opened_at = Some(e.occurred_at);
                self.observations.extend(e.notes.iter().cloned());
                self.created = true;
            }
            ShiftEvent::MovementRecorded(e) => {
                if let Some(totals) = self.totals.after_movement(&e.movement) {
                    self.totals = totals;
                }
                self.movements.push(e.movement.clone());
            }
            ShiftEvent::SaleSettled(e) => {
                if let Some(totals) = self.totals.after_settlement(&e.settlement) {
                    self.totals = totals;
                }
                self.settlements.push(e.settlement.clone());
            }
            ShiftEvent::ShiftClosed(e) => {
                self.status = ShiftStatus::Closed;
                self.closing = Some(e.closing.clone());
                self.observations.extend(e.notes.iter().cloned());
            }
            ShiftEvent::ShiftAnnotated(e) => {
                self.annotations.push(e.note.clone());
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ShiftCommand::Open(cmd) => self.handle_open(cmd),
            ShiftCommand::RecordMovement(cmd) => self.handle_record(cmd),
            ShiftCommand::SettleSale(cmd) => self.handle_settle(cmd),
            ShiftCommand::Close(cmd) => self.handle_close(cmd),
            ShiftCommand::Annotate(cmd) => self.handle_annotate(cmd),
        }
    }
}

impl CashShift {
    fn ensure_exists(&self, shift_id: ShiftId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("shift {shift_id}")));
        }
        if self.id != shift_id {
            return Err(DomainError::invalid_state("shift_id mismatch"));
        }
        Ok(())
    }

    fn ensure_open(&self, shift_id: ShiftId) -> Result<(), DomainError> {
        self.ensure_exists(shift_id)?;
        if self.status != ShiftStatus::Open {
            return Err(DomainError::invalid_state(format!("shift {shift_id} is closed")));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenShift) -> Result<Vec<ShiftEvent>, DomainError> {
        if self.created {
            return Err(DomainError::invalid_state("shift already exists"));
        }
        if cmd.opening_amount.is_negative() {
            return Err(DomainError::validation("opening amount cannot be negative"));
        }
        if let Some(count) = &cmd.opening_count {
            count.validate_against(cmd.opening_amount)?;
        }

        Ok(vec![ShiftEvent::ShiftOpened(ShiftOpened {
            shift_id: cmd.shift_id,
            register_id: cmd.register_id,
            branch_id: cmd.branch_id,
            cashier_id: cmd.cashier_id,
            opening_amount: cmd.opening_amount,
            opening_count: cmd.opening_count.clone(),
            notes: non_blank(&cmd.notes),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record(&self, cmd: &RecordMovement) -> Result<Vec<ShiftEvent>, DomainError> {
        if !cmd.amount.is_positive() {
            return Err(DomainError::validation("movement amount must be positive"));
        }
        if cmd.concept.trim().is_empty() {
            return Err(DomainError::validation("concept cannot be empty"));
        }
        self.ensure_open(cmd.shift_id)?;

        match cmd.kind {
            MovementKind::Sale => {
                let Some(order_id) = cmd.order_id else {
                    return Err(DomainError::validation("a sale movement must reference its order"));
                };
                if self.sale_movement(order_id).is_some() {
                    return Err(DomainError::invalid_state(format!(
                        "order {order_id} already has a sale movement in this shift"
                    )));
                }
            }
            kind if kind.is_outflow() && cmd.authorized_by.is_none() => {
                return Err(DomainError::validation(format!("{kind} movements need an authorizer")));
            }
            _ => {}
        }

        let movement = CashMovement {
            id: cmd.movement_id,
            shift_id: cmd.shift_id,
            order_id: cmd.order_id,
            kind: cmd.kind,
            concept: cmd.concept.trim().to_string(),
            amount: cmd.amount,
            method: cmd.method,
            reference: cmd.reference.clone(),
            authorized_by: cmd.authorized_by,
            recorded_by: cmd.recorded_by,
            recorded_at: cmd.occurred_at,
        };
        self.totals
            .after_movement(&movement)
            .and_then(|t| t.checked_expected_cash(self.opening_amount))
            .ok_or_else(amount_out_of_range)?;

        Ok(vec![ShiftEvent::MovementRecorded(MovementRecorded { movement })])
    }

    fn handle_settle(&self, cmd: &SettleSale) -> Result<Vec<ShiftEvent>, DomainError> {
        self.ensure_open(cmd.shift_id)?;

        let movement = self.sale_movement(cmd.order_id).ok_or_else(|| {
            DomainError::not_found(format!("sale movement for order {}", cmd.order_id))
        })?;
        if self.settlement_for(movement.id).is_some() {
            return Err(DomainError::invalid_state(format!(
                "sale for order {} is already settled",
                cmd.order_id
            )));
        }

        let settlement = Settlement {
            movement_id: movement.id,
            order_id: cmd.order_id,
            method: cmd.method,
            amount: movement.amount,
            reference: cmd.reference.clone(),
            settled_at: cmd.occurred_at,
        };
        self.totals
            .after_settlement(&settlement)
            .and_then(|t| t.checked_expected_cash(self.opening_amount))
            .ok_or_else(amount_out_of_range)?;

        Ok(vec![ShiftEvent::SaleSettled(SaleSettled { shift_id: cmd.shift_id, settlement })])
    }

    fn handle_close(&self, cmd: &CloseShift) -> Result<Vec<ShiftEvent>, DomainError> {
        if cmd.counted.is_negative() {
            return Err(DomainError::validation("counted amount cannot be negative"));
        }
        if cmd.tolerance.is_negative() {
            return Err(DomainError::validation("tolerance cannot be negative"));
        }
        if let Some(count) = &cmd.count {
            count.validate_against(cmd.counted)?;
        }
        self.ensure_open(cmd.shift_id)?;

        let expected = self.expected_cash();
        let difference = cmd.counted.checked_sub(expected).ok_or_else(amount_out_of_range)?;

        Ok(vec![ShiftEvent::ShiftClosed(ShiftClosed {
            shift_id: cmd.shift_id,
            closing: ShiftClosing {
                counted: cmd.counted,
                expected,
                difference,
                out_of_balance: difference.abs() > cmd.tolerance,
                count: cmd.count.clone(),
                closed_by: cmd.closed_by,
                closed_at: cmd.occurred_at,
            },
            notes: non_blank(&cmd.notes),
        })])
    }

    fn handle_annotate(&self, cmd: &AnnotateShift) -> Result<Vec<ShiftEvent>, DomainError> {
        self.ensure_exists(cmd.shift_id)?;
        if self.status != ShiftStatus::Closed {
            return Err(DomainError::invalid_state("only closed shifts can be annotated"));
        }
        if cmd.note.trim().is_empty() {
            return Err(DomainError::validation("note cannot be empty"));
        }

        Ok(vec![ShiftEvent::ShiftAnnotated(ShiftAnnotated {
            shift_id: cmd.shift_id,
            note: SupervisorNote {
                supervisor_id: cmd.supervisor_id,
                note: cmd.note.trim().to_string(),
                noted_at: cmd.occurred_at,
            },
        })])
    }
}

fn amount_out_of_range() -> DomainError {
    DomainError::validation("amount takes the shift totals out of range")
}

fn non_blank(notes: &Option<String>) -> Option<String> {
    notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}
