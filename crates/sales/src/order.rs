use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use retailpos_core::{
    Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, Money, PaymentMethod, UserId,
    VariantId,
};
use retailpos_events::Event;

use crate::pricing::{OrderLine, OrderTotals, ProductSnapshot, compute_totals};

/// Sales order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderId(pub AggregateId);

impl SalesOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SalesOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleChannel {
    Online,
    InStore,
}

/// Order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processed,
    Failed,
    Refunded,
}

/// Buyer details captured at the counter for customers without an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub name: String,
    pub document_id: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CustomerRef {
    Registered { user_id: UserId },
    WalkIn(CustomerSnapshot),
}

/// Data required to issue a tax invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDetails {
    pub tax_id: String,
    pub legal_name: String,
    pub fiscal_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReceiptRequest {
    #[default]
    None,
    Receipt,
    Invoice(BillingDetails),
}

/// A line as requested, before it is numbered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub variant_id: VariantId,
    pub quantity: i64,
    pub unit_price: Money,
    pub unit_discount: Money,
    pub product: ProductSnapshot,
}

/// Aggregate root: SalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SalesOrder {
    id: SalesOrderId,
    order_number: String,
    channel: SaleChannel,
    status: OrderStatus,
    payment_status: PaymentStatus,
    payment_method: Option<PaymentMethod>,
    payment_reference: Option<String>,
    branch_id: Option<BranchId>,
    shift_id: Option<AggregateId>,
    seller_id: Option<UserId>,
    customer: Option<CustomerRef>,
    receipt: ReceiptRequest,
    lines: Vec<OrderLine>,
    totals: OrderTotals,
    placed_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    version: u64,
    #[serde(skip)]
    created: bool,
}

impl SalesOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: SalesOrderId) -> Self {
        Self {
            id,
            order_number: String::new(),
            channel: SaleChannel::InStore,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: None,
            payment_reference: None,
            branch_id: None,
            shift_id: None,
            seller_id: None,
            customer: None,
            receipt: ReceiptRequest::None,
            lines: Vec::new(),
            totals: OrderTotals::default(),
            placed_at: None,
            paid_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    /// Human-readable number printed on receipts. Empty until placed.
    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn channel(&self) -> SaleChannel {
        self.channel
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn payment_method(&self) -> Option<PaymentMethod> {
        self.payment_method
    }

    pub fn payment_reference(&self) -> Option<&str> {
        self.payment_reference.as_deref()
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    /// Shift the sale was rung up on (in-store sales only).
    pub fn shift_id(&self) -> Option<AggregateId> {
        self.shift_id
    }

    pub fn seller_id(&self) -> Option<UserId> {
        self.seller_id
    }

    pub fn customer(&self) -> Option<&CustomerRef> {
        self.customer.as_ref()
    }

    pub fn receipt(&self) -> &ReceiptRequest {
        &self.receipt
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn totals(&self) -> &OrderTotals {
        &self.totals
    }

    pub fn placed_at(&self) -> Option<DateTime<Utc>> {
        self.placed_at
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    /// Quantity per variant across all lines.
    ///
    /// Placing an order already checked that these sums fit in an `i64`.
    pub fn quantities(&self) -> Vec<(VariantId, i64)> {
        let mut out: Vec<(VariantId, i64)> = Vec::new();
        for line in &self.lines {
            match out.iter_mut().find(|(v, _)| *v == line.variant_id) {
                Some((_, q)) => *q = q.saturating_add(line.quantity),
                None => out.push((line.variant_id, line.quantity)),
            }
        }
        out
    }

    pub fn is_awaiting_payment(&self) -> bool {
        self.status == OrderStatus::Pending && self.payment_status == PaymentStatus::Pending
    }
}

impl AggregateRoot for SalesOrder {
    type Id = SalesOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder. Creates the order with all of its lines at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: SalesOrderId,
    pub order_number: String,
    pub channel: SaleChannel,
    pub branch_id: BranchId,
    pub shift_id: Option<AggregateId>,
    pub seller_id: UserId,
    pub customer: Option<CustomerRef>,
    pub receipt: ReceiptRequest,
    pub lines: Vec<NewOrderLine>,
    pub discount_total: Money,
    pub shipping: Money,
    pub tax_rate_bps: u32,
    pub payment_method: PaymentMethod,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPayment {
    pub order_id: SalesOrderId,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FailPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailPayment {
    pub order_id: SalesOrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: SalesOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RefundPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPayment {
    pub order_id: SalesOrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceFulfillment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceFulfillment {
    pub order_id: SalesOrderId,
    pub to: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderCommand {
    PlaceOrder(PlaceOrder),
    ConfirmPayment(ConfirmPayment),
    FailPayment(FailPayment),
    CancelOrder(CancelOrder),
    RefundPayment(RefundPayment),
    AdvanceFulfillment(AdvanceFulfillment),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: SalesOrderId,
    pub order_number: String,
    pub channel: SaleChannel,
    pub branch_id: BranchId,
    pub shift_id: Option<AggregateId>,
    pub seller_id: UserId,
    pub customer: Option<CustomerRef>,
    pub receipt: ReceiptRequest,
    pub lines: Vec<OrderLine>,
    pub totals: OrderTotals,
    pub payment_method: PaymentMethod,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmed {
    pub order_id: SalesOrderId,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentFailed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub order_id: SalesOrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: SalesOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRefunded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRefunded {
    pub order_id: SalesOrderId,
    pub amount: Money,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: FulfillmentAdvanced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentAdvanced {
    pub order_id: SalesOrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderEvent {
    OrderPlaced(OrderPlaced),
    PaymentConfirmed(PaymentConfirmed),
    PaymentFailed(PaymentFailed),
    OrderCancelled(OrderCancelled),
    PaymentRefunded(PaymentRefunded),
    FulfillmentAdvanced(FulfillmentAdvanced),
}

impl Event for SalesOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SalesOrderEvent::OrderPlaced(_) => "sales.order.placed",
            SalesOrderEvent::PaymentConfirmed(_) => "sales.order.payment_confirmed",
            SalesOrderEvent::PaymentFailed(_) => "sales.order.payment_failed",
            SalesOrderEvent::OrderCancelled(_) => "sales.order.cancelled",
            SalesOrderEvent::PaymentRefunded(_) => "sales.order.payment_refunded",
            SalesOrderEvent::FulfillmentAdvanced(_) => "sales.order.fulfillment_advanced",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SalesOrderEvent::OrderPlaced(e) => e.occurred_at,
            SalesOrderEvent::PaymentConfirmed(e) => e.occurred_at,
            SalesOrderEvent::PaymentFailed(e) => e.occurred_at,
            SalesOrderEvent::OrderCancelled(e) => e.occurred_at,
            SalesOrderEvent::PaymentRefunded(e) => e.occurred_at,
            SalesOrderEvent::FulfillmentAdvanced(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SalesOrder {
    const AGGREGATE_TYPE: &'static str = "sales.order";

    type Command = SalesOrderCommand;
    type Event = SalesOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SalesOrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.order_number = e.order_number.clone();
                self.channel = e.channel;
                self.status = OrderStatus::Pending;
                self.payment_status = PaymentStatus::Pending;
                self.payment_method = Some(e.payment_method);
                self.branch_id = Some(e.branch_id);
                self.shift_id = e.shift_id;
                self.seller_id = Some(e.seller_id);
                self.customer = e.customer.clone();
                self.receipt = e.receipt.clone();
                self.lines = e.lines.clone();
                self.totals = e.totals;
                self.placed_at = Some(e.occurred_at);
                self.created = true;
            }
            SalesOrderEvent::PaymentConfirmed(e) => {
                self.payment_status = PaymentStatus::Processed;
                self.status = OrderStatus::Confirmed;
                self.payment_method = Some(e.method);
                self.payment_reference = e.reference.clone();
                self.paid_at = Some(e.occurred_at);
            }
            SalesOrderEvent::PaymentFailed(e) => {
                self.payment_status = PaymentStatus::Failed;
                self.status = OrderStatus::Cancelled;
                self.cancelled_at = Some(e.occurred_at);
                self.cancellation_reason = Some(e.reason.clone());
            }
            SalesOrderEvent::OrderCancelled(e) => {
                self.status = OrderStatus::Cancelled;
                self.cancelled_at = Some(e.occurred_at);
                self.cancellation_reason = e.reason.clone();
            }
            SalesOrderEvent::PaymentRefunded(e) => {
                self.payment_status = PaymentStatus::Refunded;
                self.status = OrderStatus::Cancelled;
                self.cancelled_at = Some(e.occurred_at);
                self.cancellation_reason = Some(e.reason.clone());
            }
            SalesOrderEvent::FulfillmentAdvanced(e) => {
                self.status = e.to;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SalesOrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            SalesOrderCommand::ConfirmPayment(cmd) => self.handle_confirm_payment(cmd),
            SalesOrderCommand::FailPayment(cmd) => self.handle_fail_payment(cmd),
            SalesOrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
            SalesOrderCommand::RefundPayment(cmd) => self.handle_refund(cmd),
            SalesOrderCommand::AdvanceFulfillment(cmd) => self.handle_advance(cmd),
        }
    }
}

impl SalesOrder {
    fn ensure_order(&self, order_id: SalesOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("order {order_id}")));
        }
        if self.id != order_id {
            return Err(DomainError::invalid_state("order_id mismatch"));
        }
        Ok(())
    }

    fn ensure_awaiting_payment(&self) -> Result<(), DomainError> {
        if self.payment_status != PaymentStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "payment is {:?}, expected pending",
                self.payment_status
            )));
        }
        if self.status != OrderStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "order is {:?}, expected pending",
                self.status
            )));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::invalid_state("order already exists"));
        }
        if cmd.order_number.trim().is_empty() {
            return Err(DomainError::validation("order number cannot be empty"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("an order needs at least one line"));
        }
        if cmd.channel == SaleChannel::InStore && cmd.shift_id.is_none() {
            return Err(DomainError::validation("in-store sales must be rung up on a shift"));
        }
        validate_customer(cmd.customer.as_ref())?;
        validate_receipt(&cmd.receipt)?;

        let lines: Vec<OrderLine> = cmd
            .lines
            .iter()
            .zip(1u32..)
            .map(|(l, line_no)| OrderLine {
                line_no,
                variant_id: l.variant_id,
                quantity: l.quantity,
                unit_price: l.unit_price,
                unit_discount: l.unit_discount,
                product: l.product.clone(),
            })
            .collect();
        let totals = compute_totals(&lines, cmd.discount_total, cmd.shipping, cmd.tax_rate_bps)?;
        ensure_quantities_fit(&lines)?;

        Ok(vec![SalesOrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            order_number: cmd.order_number.trim().to_string(),
            channel: cmd.channel,
            branch_id: cmd.branch_id,
            shift_id: cmd.shift_id,
            seller_id: cmd.seller_id,
            customer: cmd.customer.clone(),
            receipt: cmd.receipt.clone(),
            lines,
            totals,
            payment_method: cmd.payment_method,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm_payment(&self, cmd: &ConfirmPayment) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_order(cmd.order_id)?;
        self.ensure_awaiting_payment()?;

        Ok(vec![SalesOrderEvent::PaymentConfirmed(PaymentConfirmed {
            order_id: cmd.order_id,
            method: cmd.method,
            reference: cmd.reference.clone(),
            amount: self.totals.total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_fail_payment(&self, cmd: &FailPayment) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_order(cmd.order_id)?;
        self.ensure_awaiting_payment()?;

        Ok(vec![SalesOrderEvent::PaymentFailed(PaymentFailed {
            order_id: cmd.order_id,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_order(cmd.order_id)?;
        self.ensure_awaiting_payment()?;

        Ok(vec![SalesOrderEvent::OrderCancelled(OrderCancelled {
            order_id: cmd.order_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_refund(&self, cmd: &RefundPayment) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_order(cmd.order_id)?;
        if self.payment_status != PaymentStatus::Processed {
            return Err(DomainError::invalid_state("only processed payments can be refunded"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("a refund needs a reason"));
        }

        Ok(vec![SalesOrderEvent::PaymentRefunded(PaymentRefunded {
            order_id: cmd.order_id,
            amount: self.totals.total,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_advance(&self, cmd: &AdvanceFulfillment) -> Result<Vec<SalesOrderEvent>, DomainError> {
        self.ensure_order(cmd.order_id)?;

        let allowed = matches!(
            (self.status, cmd.to),
            (OrderStatus::Confirmed, OrderStatus::Processing)
                | (OrderStatus::Processing, OrderStatus::Shipped)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
        ) || (self.channel == SaleChannel::InStore
            && self.status == OrderStatus::Confirmed
            && cmd.to == OrderStatus::Delivered);

        if !allowed {
            return Err(DomainError::invalid_state(format!(
                "cannot move a {:?} order to {:?}",
                self.status, cmd.to
            )));
        }

        Ok(vec![SalesOrderEvent::FulfillmentAdvanced(FulfillmentAdvanced {
            order_id: cmd.order_id,
            from: self.status,
            to: cmd.to,
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn ensure_quantities_fit(lines: &[OrderLine]) -> Result<(), DomainError> {
    let mut totals: Vec<(VariantId, i64)> = Vec::new();
    for line in lines {
        match totals.iter_mut().find(|(v, _)| *v == line.variant_id) {
            Some((_, q)) => {
                *q = q.checked_add(line.quantity).ok_or_else(|| {
                    DomainError::validation(format!("variant {}: quantity out of range", line.variant_id))
                })?;
            }
            None => totals.push((line.variant_id, line.quantity)),
        }
    }
    Ok(())
}

fn validate_customer(customer: Option<&CustomerRef>) -> Result<(), DomainError> {
    if let Some(CustomerRef::WalkIn(snapshot)) = customer {
        if snapshot.name.trim().is_empty() {
            return Err(DomainError::validation("walk-in customer needs a name"));
        }
    }
    Ok(())
}

fn validate_receipt(receipt: &ReceiptRequest) -> Result<(), DomainError> {
    if let ReceiptRequest::Invoice(billing) = receipt {
        let missing = [
            ("tax_id", &billing.tax_id),
            ("legal_name", &billing.legal_name),
            ("fiscal_address", &billing.fiscal_address),
        ]
        .into_iter()
        .find(|(_, v)| v.trim().is_empty());
        if let Some((field, _)) = missing {
            return Err(DomainError::validation(format!("invoice requires {field}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::DEFAULT_TAX_RATE_BPS;
    use retailpos_core::ProductId;

    fn test_order_id() -> SalesOrderId {
        SalesOrderId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn new_line(variant_id: VariantId, quantity: i64, unit_price: Money) -> NewOrderLine {
        NewOrderLine {
            variant_id,
            quantity,
            unit_price,
            unit_discount: Money::ZERO,
            product: ProductSnapshot {
                product_id: ProductId::new(),
                sku: "VST-001-M".to_string(),
                name: "Vestido floral".to_string(),
                size: Some("M".to_string()),
                color: Some("rojo".to_string()),
            },
        }
    }

    fn place_cmd(order_id: SalesOrderId, channel: SaleChannel, lines: Vec<NewOrderLine>) -> PlaceOrder {
        PlaceOrder {
            order_id,
            order_number: "R1-0001-0001".to_string(),
            channel,
            branch_id: BranchId::new(),
            shift_id: (channel == SaleChannel::InStore).then(AggregateId::new),
            seller_id: UserId::new(),
            customer: None,
            receipt: ReceiptRequest::Receipt,
            lines,
            discount_total: Money::ZERO,
            shipping: Money::ZERO,
            tax_rate_bps: DEFAULT_TAX_RATE_BPS,
            payment_method: PaymentMethod::Cash,
            occurred_at: test_time(),
        }
    }

    fn exec(order: &mut SalesOrder, cmd: SalesOrderCommand) -> Result<(), DomainError> {
        for e in order.handle(&cmd)? {
            order.apply(&e);
        }
        Ok(())
    }

    fn placed(channel: SaleChannel) -> SalesOrder {
        let order_id = test_order_id();
        let mut order = SalesOrder::empty(order_id);
        let cmd = place_cmd(order_id, channel, vec![new_line(VariantId::new(), 2, Money::new(75, 0))]);
        exec(&mut order, SalesOrderCommand::PlaceOrder(cmd)).unwrap();
        order
    }

    fn confirm(order: &mut SalesOrder) -> Result<(), DomainError> {
        let order_id = *order.id();
        exec(
            order,
            SalesOrderCommand::ConfirmPayment(ConfirmPayment {
                order_id,
                method: PaymentMethod::Card,
                reference: Some("VISA-0042".to_string()),
                occurred_at: test_time(),
            }),
        )
    }

    fn advance(order: &mut SalesOrder, to: OrderStatus) -> Result<(), DomainError> {
        let order_id = *order.id();
        exec(
            order,
            SalesOrderCommand::AdvanceFulfillment(AdvanceFulfillment { order_id, to, occurred_at: test_time() }),
        )
    }

    #[test]
    fn place_order_numbers_lines_and_computes_totals() {
        let order = placed(SaleChannel::InStore);
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.payment_status(), PaymentStatus::Pending);
        assert_eq!(order.lines()[0].line_no, 1);
        assert_eq!(order.totals().total, Money::new(177, 0));
        assert_eq!(order.version(), 1);
    }

    #[test]
    fn order_number_is_required_and_kept() {
        let order = placed(SaleChannel::InStore);
        assert_eq!(order.order_number(), "R1-0001-0001");

        let order_id = test_order_id();
        let mut cmd = place_cmd(order_id, SaleChannel::InStore, vec![new_line(VariantId::new(), 1, Money::new(5, 0))]);
        cmd.order_number = "  ".to_string();
        assert!(matches!(
            SalesOrder::empty(order_id).handle(&SalesOrderCommand::PlaceOrder(cmd)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn per_variant_quantity_past_i64_is_rejected() {
        let order_id = test_order_id();
        let variant = VariantId::new();
        let free = new_line(variant, i64::MAX, Money::ZERO);
        let cmd = place_cmd(order_id, SaleChannel::InStore, vec![free.clone(), free]);
        assert!(matches!(
            SalesOrder::empty(order_id).handle(&SalesOrderCommand::PlaceOrder(cmd)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn quantities_are_summed_per_variant() {
        let order_id = test_order_id();
        let variant = VariantId::new();
        let mut order = SalesOrder::empty(order_id);
        let cmd = place_cmd(
            order_id,
            SaleChannel::InStore,
            vec![
                new_line(variant, 1, Money::new(10, 0)),
                new_line(VariantId::new(), 4, Money::new(5, 0)),
                new_line(variant, 2, Money::new(10, 0)),
            ],
        );
        exec(&mut order, SalesOrderCommand::PlaceOrder(cmd)).unwrap();
        assert_eq!(order.quantities()[0], (variant, 3));
        assert_eq!(order.quantities().len(), 2);
    }

    #[test]
    fn empty_orders_and_incomplete_invoices_are_rejected() {
        let order_id = test_order_id();
        let order = SalesOrder::empty(order_id);
        let empty = place_cmd(order_id, SaleChannel::InStore, Vec::new());
        assert!(matches!(
            order.handle(&SalesOrderCommand::PlaceOrder(empty)),
            Err(DomainError::Validation(_))
        ));

        let mut invoice = place_cmd(order_id, SaleChannel::InStore, vec![new_line(VariantId::new(), 1, Money::new(1, 0))]);
        invoice.receipt = ReceiptRequest::Invoice(BillingDetails {
            tax_id: "20123456789".to_string(),
            legal_name: "  ".to_string(),
            fiscal_address: "Av. Grau 123".to_string(),
        });
        match order.handle(&SalesOrderCommand::PlaceOrder(invoice)) {
            Err(DomainError::Validation(msg)) => assert!(msg.contains("legal_name")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn confirm_payment_is_only_possible_once() {
        let mut order = placed(SaleChannel::InStore);
        confirm(&mut order).unwrap();
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(order.payment_status(), PaymentStatus::Processed);
        assert_eq!(order.payment_method(), Some(PaymentMethod::Card));
        assert_eq!(order.payment_reference(), Some("VISA-0042"));
        assert!(matches!(confirm(&mut order), Err(DomainError::InvalidState(_))));
    }

    #[test]
    fn cancelled_orders_cannot_be_paid() {
        let mut order = placed(SaleChannel::InStore);
        let order_id = *order.id();
        exec(
            &mut order,
            SalesOrderCommand::CancelOrder(CancelOrder { order_id, reason: None, occurred_at: test_time() }),
        )
        .unwrap();
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert!(matches!(confirm(&mut order), Err(DomainError::InvalidState(_))));
    }

    #[test]
    fn failed_payment_cancels_the_order() {
        let mut order = placed(SaleChannel::Online);
        let order_id = *order.id();
        exec(
            &mut order,
            SalesOrderCommand::FailPayment(FailPayment {
                order_id,
                reason: "card declined".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::Failed);
        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.cancellation_reason(), Some("card declined"));
    }

    #[test]
    fn refund_requires_a_processed_payment() {
        let mut order = placed(SaleChannel::InStore);
        let order_id = *order.id();
        let refund = SalesOrderCommand::RefundPayment(RefundPayment {
            order_id,
            reason: "talla equivocada".to_string(),
            occurred_at: test_time(),
        });
        assert!(matches!(order.handle(&refund), Err(DomainError::InvalidState(_))));

        confirm(&mut order).unwrap();
        exec(&mut order, refund).unwrap();
        assert_eq!(order.payment_status(), PaymentStatus::Refunded);
        assert_eq!(order.status(), OrderStatus::Cancelled);
    }

    #[test]
    fn online_fulfilment_walks_every_step() {
        let mut order = placed(SaleChannel::Online);
        confirm(&mut order).unwrap();
        assert!(matches!(advance(&mut order, OrderStatus::Delivered), Err(DomainError::InvalidState(_))));

        advance(&mut order, OrderStatus::Processing).unwrap();
        advance(&mut order, OrderStatus::Shipped).unwrap();
        advance(&mut order, OrderStatus::Delivered).unwrap();
        assert_eq!(order.status(), OrderStatus::Delivered);
    }

    #[test]
    fn in_store_orders_are_handed_over_directly() {
        let mut order = placed(SaleChannel::InStore);
        assert!(matches!(advance(&mut order, OrderStatus::Delivered), Err(DomainError::InvalidState(_))));
        confirm(&mut order).unwrap();
        advance(&mut order, OrderStatus::Delivered).unwrap();
        assert_eq!(order.status(), OrderStatus::Delivered);
    }

    #[test]
    fn in_store_sale_without_shift_is_rejected() {
        let order_id = test_order_id();
        let mut cmd = place_cmd(order_id, SaleChannel::InStore, vec![new_line(VariantId::new(), 1, Money::new(1, 0))]);
        cmd.shift_id = None;
        assert!(matches!(
            SalesOrder::empty(order_id).handle(&SalesOrderCommand::PlaceOrder(cmd)),
            Err(DomainError::Validation(_))
        ));
    }
}
