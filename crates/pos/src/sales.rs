//! Sale registration and everything that happens to a sale afterwards.
//!
//! A sale touches three kinds of streams: the order, one stock record per
//! variant sold, and the shift's cash ledger. Each operation below decides on
//! all of them inside one unit of work, so either every stream moves or none
//! does.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use retailpos_auth::Permission;
use retailpos_cash::{MovementId, MovementKind, RecordMovement, SettleSale, ShiftCommand, ShiftId};
use retailpos_core::{Aggregate, AggregateId, BranchId, Money, PaymentMethod, StockShortfall, UserId, VariantId};
use retailpos_events::{EventBus, EventEnvelope};
use retailpos_infra::command_dispatcher::UnitOfWork;
use retailpos_infra::event_store::EventStore;
use retailpos_inventory::{
    ConfirmReservation, IngestStock, InventoryCommand, ReleaseStock, ReserveStock, StockRecordId,
};
use retailpos_sales::{
    CancelOrder, ConfirmPayment, CustomerRef, FailPayment, NewOrderLine, PlaceOrder, ReceiptRequest,
    RefundPayment, SaleChannel, SalesOrder, SalesOrderCommand, SalesOrderId,
};

use crate::error::PosError;
use crate::service::{AuditScope, PosService};

#[derive(Debug, Clone)]
pub struct SaleLineRequest {
    pub variant_id: VariantId,
    pub quantity: i64,
    /// Falls back to the catalog base price.
    pub unit_price: Option<Money>,
    pub unit_discount: Money,
}

impl SaleLineRequest {
    pub fn new(variant_id: VariantId, quantity: i64) -> Self {
        Self {
            variant_id,
            quantity,
            unit_price: None,
            unit_discount: Money::ZERO,
        }
    }

    pub fn at_price(mut self, unit_price: Money) -> Self {
        self.unit_price = Some(unit_price);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RegisterSaleRequest {
    pub shift_id: ShiftId,
    pub lines: Vec<SaleLineRequest>,
    pub payment_method: PaymentMethod,
    /// Voucher or terminal operation number, stored on the sale movement.
    pub payment_reference: Option<String>,
    pub discount_total: Money,
    pub shipping: Money,
    pub customer: Option<CustomerRef>,
    pub receipt: ReceiptRequest,
}

impl RegisterSaleRequest {
    pub fn new(shift_id: ShiftId, lines: Vec<SaleLineRequest>, payment_method: PaymentMethod) -> Self {
        Self {
            shift_id,
            lines,
            payment_method,
            payment_reference: None,
            discount_total: Money::ZERO,
            shipping: Money::ZERO,
            customer: None,
            receipt: ReceiptRequest::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefundSaleRequest {
    pub order_id: SalesOrderId,
    /// Open shift that pays the money back.
    pub shift_id: ShiftId,
    pub reason: String,
}

impl<S, B> PosService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Whether `quantity` units of a variant could be reserved at a branch right now.
    pub fn validate_stock(&self, variant_id: VariantId, quantity: i64, branch_id: BranchId) -> Result<bool, PosError> {
        if quantity <= 0 {
            return Err(PosError::validation("quantity must be positive"));
        }
        Ok(self.stock_record(variant_id, branch_id)?.reservable() >= quantity)
    }

    pub fn order(&self, order_id: SalesOrderId) -> Result<SalesOrder, PosError> {
        let order = self.load_order(order_id)?.into_state();
        if !order.exists() {
            return Err(PosError::not_found(format!("order {order_id}")));
        }
        Ok(order)
    }

    /// Orders rung up on a shift, in the order they were registered.
    pub fn shift_sales(&self, shift_id: ShiftId) -> Result<Vec<SalesOrder>, PosError> {
        let shift = self.shift(shift_id)?;
        shift
            .movements()
            .iter()
            .filter(|m| m.kind == MovementKind::Sale)
            .filter_map(|m| m.order_id)
            .map(|order_id| self.order(SalesOrderId::new(order_id)))
            .collect()
    }

    /// Ring up a sale on an open shift.
    ///
    /// Every line is checked against the shift's branch before anything is
    /// decided; if any line is short, all shortfalls are reported and nothing
    /// is written. On success the order, its reservations and an unsettled
    /// sale movement are committed together.
    pub fn register_sale(&self, actor_id: UserId, request: RegisterSaleRequest) -> Result<SalesOrder, PosError> {
        let order_id = SalesOrderId::new(AggregateId::new());
        let scope = AuditScope::new("pos.sale.register", SalesOrder::AGGREGATE_TYPE, actor_id).entity_id(order_id);
        let result = self.try_register_sale(actor_id, order_id, &request);
        self.audited(scope, result)
    }

    fn try_register_sale(
        &self,
        actor_id: UserId,
        order_id: SalesOrderId,
        request: &RegisterSaleRequest,
    ) -> Result<SalesOrder, PosError> {
        let actor = self.authorized(actor_id, &Permission::SALE_REGISTER)?;
        let lines = self.price_lines(&request.lines)?;
        let wanted = quantities_per_variant(&lines)?;

        self.with_retry("register_sale", || {
            let mut shift = self.load_shift(request.shift_id)?;
            if !shift.state().exists() {
                return Err(PosError::not_found(format!("shift {}", request.shift_id)));
            }
            if !shift.state().is_open() {
                return Err(PosError::invalid_state(format!("shift {} is closed", request.shift_id)));
            }
            let (Some(branch_id), Some(register_id)) = (shift.state().branch_id(), shift.state().register_id()) else {
                return Err(PosError::not_found(format!("shift {}", request.shift_id)));
            };
            let register = self.load_register(register_id)?;
            if !register.state().settings().accepts(request.payment_method) {
                return Err(PosError::validation(format!(
                    "register '{}' does not accept {} payments",
                    register.state().code(),
                    request.payment_method
                )));
            }

            let mut records = Vec::with_capacity(wanted.len());
            let mut shortfalls = Vec::new();
            for &(variant_id, quantity) in &wanted {
                let record_id = StockRecordId::for_pair(variant_id, branch_id);
                let record = self.load_stock(record_id)?;
                if !record.state().exists() {
                    return Err(PosError::not_found(format!(
                        "no stock record for variant {variant_id} at branch {branch_id}"
                    )));
                }
                let reservable = record.state().reservable();
                if reservable < quantity {
                    shortfalls.push(StockShortfall { variant_id, branch_id, requested: quantity, reservable });
                }
                records.push((record_id, record, quantity));
            }
            if !shortfalls.is_empty() {
                return Err(PosError::InsufficientStock(shortfalls));
            }

            let order_number = format!(
                "{}-{:04}-{:04}",
                register.state().code(),
                register.state().shifts_opened(),
                shift.state().totals().transaction_count.saturating_add(1)
            );
            let now = Utc::now();
            let mut order = self.load_order(order_id)?;
            let mut unit = self.dispatcher.begin();
            unit.execute(
                &mut order,
                SalesOrderCommand::PlaceOrder(PlaceOrder {
                    order_id,
                    order_number: order_number.clone(),
                    channel: SaleChannel::InStore,
                    branch_id,
                    shift_id: Some(request.shift_id.0),
                    seller_id: actor.user_id,
                    customer: request.customer.clone(),
                    receipt: request.receipt.clone(),
                    lines: lines.clone(),
                    discount_total: request.discount_total,
                    shipping: request.shipping,
                    tax_rate_bps: self.config.tax_rate_bps,
                    payment_method: request.payment_method,
                    occurred_at: now,
                }),
            )?;

            let total = order.state().totals().total;
            if !total.is_positive() {
                return Err(PosError::validation("a sale must have a positive total"));
            }

            for (record_id, record, quantity) in &mut records {
                unit.execute(
                    record,
                    InventoryCommand::Reserve(ReserveStock { record_id: *record_id, quantity: *quantity, occurred_at: now }),
                )?;
            }

            unit.execute(
                &mut shift,
                ShiftCommand::RecordMovement(RecordMovement {
                    shift_id: request.shift_id,
                    movement_id: MovementId::new(),
                    order_id: Some(order_id.0),
                    kind: MovementKind::Sale,
                    concept: format!("sale {order_number}"),
                    amount: total,
                    method: request.payment_method,
                    reference: request.payment_reference.clone(),
                    authorized_by: None,
                    recorded_by: actor.user_id,
                    occurred_at: now,
                }),
            )?;
            self.commit(unit)?;

            tracing::info!(
                order_id = %order_id,
                order_number = %order_number,
                shift_id = %request.shift_id,
                total = %total,
                lines = lines.len(),
                "sale registered"
            );
            Ok(order.into_state())
        })
    }

    fn price_lines(&self, lines: &[SaleLineRequest]) -> Result<Vec<NewOrderLine>, PosError> {
        if lines.is_empty() {
            return Err(PosError::validation("a sale needs at least one line"));
        }

        lines
            .iter()
            .zip(1..)
            .map(|(line, line_no)| {
                if line.quantity <= 0 {
                    return Err(PosError::validation(format!("line {line_no}: quantity must be positive")));
                }
                let entry = self
                    .ports
                    .catalog
                    .resolve(line.variant_id)
                    .ok_or_else(|| PosError::not_found(format!("variant {}", line.variant_id)))?;
                Ok(NewOrderLine {
                    variant_id: line.variant_id,
                    quantity: line.quantity,
                    unit_price: line.unit_price.unwrap_or(entry.base_price),
                    unit_discount: line.unit_discount,
                    product: entry.snapshot,
                })
            })
            .collect()
    }

    /// Payment went through: the order is confirmed, every reservation becomes
    /// a deduction and, if the shift that sold it is still open, the sale
    /// movement is settled under `method`.
    pub fn confirm_payment(
        &self,
        actor_id: UserId,
        order_id: SalesOrderId,
        method: PaymentMethod,
        reference: Option<String>,
    ) -> Result<SalesOrder, PosError> {
        let scope = AuditScope::new("pos.sale.confirm_payment", SalesOrder::AGGREGATE_TYPE, actor_id)
            .entity_id(order_id)
            .before(self.load_order(order_id).ok().as_ref().and_then(Self::snapshot));

        let result = self.authorized(actor_id, &Permission::PAYMENT_CONFIRM).and_then(|_| {
            self.with_retry("confirm_payment", || {
                let now = Utc::now();
                let mut order = self.load_order(order_id)?;
                let mut unit = self.dispatcher.begin();
                unit.execute(
                    &mut order,
                    SalesOrderCommand::ConfirmPayment(ConfirmPayment {
                        order_id,
                        method,
                        reference: reference.clone(),
                        occurred_at: now,
                    }),
                )?;

                let branch_id = order_branch(order.state())?;
                for (variant_id, quantity) in order.state().quantities() {
                    let record_id = StockRecordId::for_pair(variant_id, branch_id);
                    let mut record = self.load_stock(record_id)?;
                    unit.execute(
                        &mut record,
                        InventoryCommand::Confirm(ConfirmReservation { record_id, quantity, occurred_at: now }),
                    )?;
                }

                if let Some(shift_id) = order.state().shift_id().map(ShiftId::new) {
                    let mut shift = self.load_shift(shift_id)?;
                    if shift.state().is_open() {
                        unit.execute(
                            &mut shift,
                            ShiftCommand::SettleSale(SettleSale {
                                shift_id,
                                order_id: order_id.0,
                                method,
                                reference: reference.clone(),
                                occurred_at: now,
                            }),
                        )?;
                    } else {
                        tracing::info!(
                            order_id = %order_id,
                            shift_id = %shift_id,
                            "payment confirmed after the shift closed; cash ledger left untouched"
                        );
                    }
                }

                self.commit(unit)?;
                Ok(order.into_state())
            })
        });

        self.audited(scope, result)
    }

    /// The payment gateway gave up: the order is cancelled and its stock released.
    pub fn fail_payment(&self, actor_id: UserId, order_id: SalesOrderId, reason: &str) -> Result<SalesOrder, PosError> {
        let scope = AuditScope::new("pos.sale.fail_payment", SalesOrder::AGGREGATE_TYPE, actor_id)
            .entity_id(order_id)
            .before(self.load_order(order_id).ok().as_ref().and_then(Self::snapshot));

        let result = self.authorized(actor_id, &Permission::PAYMENT_CONFIRM).and_then(|_| {
            self.with_retry("fail_payment", || {
                let now = Utc::now();
                let mut order = self.load_order(order_id)?;
                let mut unit = self.dispatcher.begin();
                unit.execute(
                    &mut order,
                    SalesOrderCommand::FailPayment(FailPayment { order_id, reason: reason.to_string(), occurred_at: now }),
                )?;
                self.release_reservations(&mut unit, order.state(), now)?;
                self.commit(unit)?;
                Ok(order.into_state())
            })
        });

        self.audited(scope, result)
    }

    /// Cancel an unpaid sale and release its stock.
    ///
    /// The sale movement stays in the ledger; it was never settled, so it never
    /// counted toward expected cash.
    pub fn cancel_sale(&self, actor_id: UserId, order_id: SalesOrderId, reason: Option<String>) -> Result<SalesOrder, PosError> {
        let scope = AuditScope::new("pos.sale.cancel", SalesOrder::AGGREGATE_TYPE, actor_id)
            .entity_id(order_id)
            .before(self.load_order(order_id).ok().as_ref().and_then(Self::snapshot));

        let result = self.authorized(actor_id, &Permission::SALE_CANCEL).and_then(|_| {
            self.with_retry("cancel_sale", || {
                let now = Utc::now();
                let mut order = self.load_order(order_id)?;
                let mut unit = self.dispatcher.begin();
                unit.execute(
                    &mut order,
                    SalesOrderCommand::CancelOrder(CancelOrder { order_id, reason: reason.clone(), occurred_at: now }),
                )?;
                self.release_reservations(&mut unit, order.state(), now)?;
                self.commit(unit)?;
                Ok(order.into_state())
            })
        });

        self.audited(scope, result)
    }

    /// Pay back a processed sale from an open shift and return its items to stock.
    pub fn refund_sale(&self, actor_id: UserId, request: RefundSaleRequest) -> Result<SalesOrder, PosError> {
        let scope = AuditScope::new("pos.sale.refund", SalesOrder::AGGREGATE_TYPE, actor_id)
            .entity_id(request.order_id)
            .before(self.load_order(request.order_id).ok().as_ref().and_then(Self::snapshot));

        let result = self.authorized(actor_id, &Permission::OUTFLOW_AUTHORIZE).and_then(|actor| {
            self.with_retry("refund_sale", || {
                let now = Utc::now();
                let order_id = request.order_id;
                let mut order = self.load_order(order_id)?;
                let mut unit = self.dispatcher.begin();
                unit.execute(
                    &mut order,
                    SalesOrderCommand::RefundPayment(RefundPayment {
                        order_id,
                        reason: request.reason.clone(),
                        occurred_at: now,
                    }),
                )?;

                let refunded = order.state();
                let method = refunded
                    .payment_method()
                    .ok_or_else(|| PosError::invalid_state(format!("order {order_id} has no payment method")))?;
                let mut shift = self.load_shift(request.shift_id)?;
                unit.execute(
                    &mut shift,
                    ShiftCommand::RecordMovement(RecordMovement {
                        shift_id: request.shift_id,
                        movement_id: MovementId::new(),
                        order_id: Some(order_id.0),
                        kind: MovementKind::Refund,
                        concept: format!("refund of order {}", refunded.order_number()),
                        amount: refunded.totals().total,
                        method,
                        reference: None,
                        authorized_by: Some(actor.user_id),
                        recorded_by: actor.user_id,
                        occurred_at: now,
                    }),
                )?;

                let branch_id = order_branch(refunded)?;
                for (variant_id, quantity) in refunded.quantities() {
                    let record_id = StockRecordId::for_pair(variant_id, branch_id);
                    let mut record = self.load_stock(record_id)?;
                    unit.execute(
                        &mut record,
                        InventoryCommand::Ingest(IngestStock {
                            record_id,
                            quantity,
                            unit_cost: Money::ZERO,
                            occurred_at: now,
                        }),
                    )?;
                }

                self.commit(unit)?;
                Ok(order.into_state())
            })
        });

        self.audited(scope, result)
    }

    fn release_reservations(&self, unit: &mut UnitOfWork, order: &SalesOrder, now: DateTime<Utc>) -> Result<(), PosError> {
        let branch_id = order_branch(order)?;
        for (variant_id, quantity) in order.quantities() {
            let record_id = StockRecordId::for_pair(variant_id, branch_id);
            let mut record = self.load_stock(record_id)?;
            unit.execute(
                &mut record,
                InventoryCommand::Release(ReleaseStock { record_id, quantity, occurred_at: now }),
            )?;
        }
        Ok(())
    }
}

fn order_branch(order: &SalesOrder) -> Result<BranchId, PosError> {
    order
        .branch_id()
        .ok_or_else(|| PosError::invalid_state("order has no branch"))
}

/// Lines for the same variant are reserved together.
fn quantities_per_variant(lines: &[NewOrderLine]) -> Result<Vec<(VariantId, i64)>, PosError> {
    let mut out: Vec<(VariantId, i64)> = Vec::new();
    for line in lines {
        match out.iter_mut().find(|(v, _)| *v == line.variant_id) {
            Some((_, q)) => {
                *q = q.checked_add(line.quantity).ok_or_else(|| {
                    PosError::validation(format!("variant {}: quantity out of range", line.variant_id))
                })?;
            }
            None => out.push((line.variant_id, line.quantity)),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use retailpos_core::ProductId;
    use retailpos_sales::ProductSnapshot;

    fn line(variant_id: VariantId, quantity: i64) -> NewOrderLine {
        NewOrderLine {
            variant_id,
            quantity,
            unit_price: Money::new(10, 0),
            unit_discount: Money::ZERO,
            product: ProductSnapshot {
                product_id: ProductId::new(),
                sku: "SKU".to_string(),
                name: "Polo".to_string(),
                size: None,
                color: None,
            },
        }
    }

    #[test]
    fn repeated_variants_are_summed_in_first_seen_order() {
        let a = VariantId::new();
        let b = VariantId::new();
        let wanted = quantities_per_variant(&[line(a, 1), line(b, 2), line(a, 3)]).unwrap();
        assert_eq!(wanted, vec![(a, 4), (b, 2)]);
    }

    #[test]
    fn summed_quantity_past_i64_is_a_validation_error() {
        let a = VariantId::new();
        assert!(matches!(
            quantities_per_variant(&[line(a, i64::MAX), line(a, 1)]),
            Err(PosError::Validation(_))
        ));
    }
}
