//! Shift reconciliation report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use retailpos_cash::{CashMovement, MethodTotals, MovementKind, RegisterId, ShiftId, ShiftStatus, summarize};
use retailpos_core::money::{checked_sum, div_round_half_up};
use retailpos_core::{BranchId, Money, UserId, VariantId};
use retailpos_events::{EventBus, EventEnvelope};
use retailpos_infra::event_store::EventStore;
use retailpos_sales::{OrderStatus, SalesOrderId};

use crate::error::PosError;
use crate::service::PosService;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindSummary {
    pub kind: MovementKind,
    pub count: u32,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemLine {
    pub variant_id: VariantId,
    pub product_name: String,
    pub quantity: i64,
    pub revenue: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShiftReport {
    pub shift_id: ShiftId,
    pub register_id: RegisterId,
    pub register_name: String,
    pub branch_id: BranchId,
    pub branch_name: Option<String>,
    pub cashier_id: UserId,
    pub cashier_name: Option<String>,
    pub status: ShiftStatus,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Only for closed shifts.
    pub duration_minutes: Option<i64>,

    pub opening_amount: Money,
    pub expected_cash: Money,
    pub counted: Option<Money>,
    pub difference: Option<Money>,
    pub out_of_balance: bool,

    pub income: MethodTotals,
    pub outflow: MethodTotals,
    pub by_kind: Vec<KindSummary>,
    pub transaction_count: u32,

    pub settled_sale_count: u32,
    pub settled_sales_total: Money,
    /// Unsettled sales whose order is still alive.
    pub pending_sales_total: Money,
    pub average_ticket: Money,

    /// Sold items across the shift, cancelled orders excluded.
    pub items: Vec<ItemLine>,
}

impl<S, B> PosService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn shift_report(&self, shift_id: ShiftId) -> Result<ShiftReport, PosError> {
        let shift = self.shift(shift_id)?;
        let (Some(register_id), Some(branch_id), Some(cashier_id)) =
            (shift.register_id(), shift.branch_id(), shift.cashier_id())
        else {
            return Err(PosError::not_found(format!("shift {shift_id}")));
        };

        let recomputed = summarize(shift.movements(), shift.settlements());
        let Some(recomputed) = recomputed.filter(|t| t == shift.totals()) else {
            return Err(PosError::internal(format!(
                "shift {shift_id}: running totals {:?} disagree with its ledger {recomputed:?}",
                shift.totals()
            )));
        };

        let register = self.register(register_id)?;
        let branch_name = self.ports.branches.resolve(branch_id).map(|b| b.name);
        let cashier_name = self.ports.identity.resolve(cashier_id).map(|a| a.display_name);

        let mut settled_sale_count = 0u32;
        let mut settled_sales_total = Money::ZERO;
        let mut pending_sales_total = Money::ZERO;
        let mut items: Vec<ItemLine> = Vec::new();

        for movement in shift.movements().iter().filter(|m| m.kind == MovementKind::Sale) {
            let Some(order_id) = movement.order_id else {
                continue;
            };
            let order = self.load_order(SalesOrderId::new(order_id))?.into_state();
            let cancelled = order.status() == OrderStatus::Cancelled;

            if let Some(settlement) = shift.settlement_for(movement.id) {
                settled_sale_count += 1;
                accumulate(&mut settled_sales_total, settlement.amount)?;
            } else if !cancelled {
                accumulate(&mut pending_sales_total, movement.amount)?;
            }

            if cancelled {
                continue;
            }
            for line in order.lines() {
                let revenue = line.line_total()?;
                match items.iter_mut().find(|i| i.variant_id == line.variant_id) {
                    Some(item) => {
                        item.quantity = item
                            .quantity
                            .checked_add(line.quantity)
                            .ok_or_else(|| PosError::validation("item quantities out of range"))?;
                        accumulate(&mut item.revenue, revenue)?;
                    }
                    None => items.push(ItemLine {
                        variant_id: line.variant_id,
                        product_name: line.product.name.clone(),
                        quantity: line.quantity,
                        revenue,
                    }),
                }
            }
        }

        let closing = shift.closing();
        let closed_at = closing.map(|c| c.closed_at);
        let duration_minutes = match (shift.opened_at(), closed_at) {
            (Some(opened), Some(closed)) => Some((closed - opened).num_minutes()),
            _ => None,
        };

        Ok(ShiftReport {
            shift_id,
            register_id,
            register_name: register.name().to_string(),
            branch_id,
            branch_name,
            cashier_id,
            cashier_name,
            status: shift.status(),
            opened_at: shift.opened_at(),
            closed_at,
            duration_minutes,
            opening_amount: shift.opening_amount(),
            expected_cash: closing.map_or_else(|| shift.expected_cash(), |c| c.expected),
            counted: closing.map(|c| c.counted),
            difference: closing.map(|c| c.difference),
            out_of_balance: closing.is_some_and(|c| c.out_of_balance),
            income: recomputed.income,
            outflow: recomputed.outflow,
            by_kind: kind_breakdown(shift.movements())?,
            transaction_count: recomputed.transaction_count,
            settled_sale_count,
            settled_sales_total,
            pending_sales_total,
            average_ticket: average_ticket(settled_sales_total, settled_sale_count),
            items,
        })
    }
}

fn accumulate(total: &mut Money, amount: Money) -> Result<(), PosError> {
    *total = total
        .checked_add(amount)
        .ok_or_else(|| PosError::validation("report totals out of range"))?;
    Ok(())
}

/// Count and amount per movement kind, every kind listed.
fn kind_breakdown(movements: &[CashMovement]) -> Result<Vec<KindSummary>, PosError> {
    MovementKind::ALL
        .iter()
        .map(|&kind| {
            let of_kind = movements.iter().filter(|m| m.kind == kind);
            Ok(KindSummary {
                kind,
                count: of_kind.clone().count() as u32,
                amount: checked_sum(of_kind.map(|m| m.amount))
                    .ok_or_else(|| PosError::validation(format!("{kind} total out of range")))?,
            })
        })
        .collect()
}

fn average_ticket(total: Money, count: u32) -> Money {
    if count == 0 {
        return Money::ZERO;
    }
    Money::from_cents(div_round_half_up(i128::from(total.cents()), i128::from(count)) as i64)
}
