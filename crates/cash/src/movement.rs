use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use retailpos_core::{AggregateId, Entity, Money, PaymentMethod, UserId};

use crate::shift::ShiftId;

/// Identifier of a single cash movement inside a shift.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(Uuid);

impl MovementId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MovementId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for MovementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Sale,
    Refund,
    Expense,
    Withdrawal,
    ExtraIncome,
}

impl MovementKind {
    pub const ALL: [MovementKind; 5] = [
        MovementKind::Sale,
        MovementKind::Refund,
        MovementKind::Expense,
        MovementKind::Withdrawal,
        MovementKind::ExtraIncome,
    ];

    /// Money coming into the drawer.
    pub fn is_income(self) -> bool {
        matches!(self, MovementKind::Sale | MovementKind::ExtraIncome)
    }

    /// Money leaving the drawer.
    pub fn is_outflow(self) -> bool {
        !self.is_income()
    }

    /// Sales wait for their payment; everything else moves money when recorded.
    pub fn settles_on_entry(self) -> bool {
        self != MovementKind::Sale
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Sale => "sale",
            MovementKind::Refund => "refund",
            MovementKind::Expense => "expense",
            MovementKind::Withdrawal => "withdrawal",
            MovementKind::ExtraIncome => "extra_income",
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a shift's cash ledger. Never updated or removed once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashMovement {
    pub id: MovementId,
    pub shift_id: ShiftId,
    pub order_id: Option<AggregateId>,
    pub kind: MovementKind,
    pub concept: String,
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub authorized_by: Option<UserId>,
    pub recorded_by: UserId,
    pub recorded_at: DateTime<Utc>,
}

impl Entity for CashMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Confirmed payment of a sale movement, kept beside the movement it settles.
///
/// The movement keeps the method it was rung up with; the settlement carries
/// the method the customer actually paid with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub movement_id: MovementId,
    pub order_id: AggregateId,
    pub method: PaymentMethod,
    pub amount: Money,
    pub reference: Option<String>,
    pub settled_at: DateTime<Utc>,
}

/// Amounts bucketed by payment method.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodTotals {
    pub cash: Money,
    pub card: Money,
    pub digital: Money,
}

impl MethodTotals {
    pub fn get(&self, method: PaymentMethod) -> Money {
        match method {
            PaymentMethod::Cash => self.cash,
            PaymentMethod::Card => self.card,
            PaymentMethod::Digital => self.digital,
        }
    }

    /// `None` when the bucket would overflow.
    pub fn checked_add(mut self, method: PaymentMethod, amount: Money) -> Option<MethodTotals> {
        let bucket = match method {
            PaymentMethod::Cash => &mut self.cash,
            PaymentMethod::Card => &mut self.card,
            PaymentMethod::Digital => &mut self.digital,
        };
        *bucket = bucket.checked_add(amount)?;
        Some(self)
    }

    pub fn total(&self) -> Money {
        self.cash + self.card + self.digital
    }
}

/// Running totals of a shift, updated on every append.
///
/// The shift checks every amount with [`ShiftTotals::after_movement`] and
/// [`ShiftTotals::after_settlement`] before it is recorded, so applying the
/// same entries here stays in range.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftTotals {
    pub income: MethodTotals,
    pub outflow: MethodTotals,
    /// Sales registered against the shift, settled or not.
    pub transaction_count: u32,
}

impl ShiftTotals {
    /// Totals once `movement` is on the ledger; `None` if an amount overflows.
    pub fn after_movement(&self, movement: &CashMovement) -> Option<ShiftTotals> {
        let mut next = *self;
        if movement.kind.settles_on_entry() {
            next.book(movement.kind, movement.method, movement.amount)?;
        } else {
            next.transaction_count = next.transaction_count.checked_add(1)?;
        }
        Some(next)
    }

    /// Totals once a sale's payment is booked; `None` if an amount overflows.
    pub fn after_settlement(&self, settlement: &Settlement) -> Option<ShiftTotals> {
        let mut next = *self;
        next.book(MovementKind::Sale, settlement.method, settlement.amount)?;
        Some(next)
    }

    fn book(&mut self, kind: MovementKind, method: PaymentMethod, amount: Money) -> Option<()> {
        if kind.is_income() {
            self.income = self.income.checked_add(method, amount)?;
        } else {
            self.outflow = self.outflow.checked_add(method, amount)?;
        }
        Some(())
    }

    /// Cash that should be in the drawer given an opening float.
    pub fn checked_expected_cash(&self, opening: Money) -> Option<Money> {
        opening.checked_add(self.income.cash)?.checked_sub(self.outflow.cash)
    }
}

/// Recompute totals from scratch by summing movements and their settlements.
///
/// `None` only if the entries could never have been recorded together.
pub fn summarize(movements: &[CashMovement], settlements: &[Settlement]) -> Option<ShiftTotals> {
    let totals = movements
        .iter()
        .try_fold(ShiftTotals::default(), |totals, m| totals.after_movement(m))?;
    settlements
        .iter()
        .try_fold(totals, |totals, s| totals.after_settlement(s))
}
