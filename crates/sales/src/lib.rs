//! Sales Orders domain module (event-sourced).
//!
//! This crate contains business rules for sales orders, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod order;
pub mod pricing;

pub use order::{
    AdvanceFulfillment, BillingDetails, CancelOrder, ConfirmPayment, CustomerRef,
    CustomerSnapshot, FailPayment, FulfillmentAdvanced, NewOrderLine, OrderCancelled,
    OrderPlaced, OrderStatus, PaymentConfirmed, PaymentFailed, PaymentRefunded, PaymentStatus,
    PlaceOrder, ReceiptRequest, RefundPayment, SaleChannel, SalesOrder, SalesOrderCommand,
    SalesOrderEvent, SalesOrderId,
};
pub use pricing::{DEFAULT_TAX_RATE_BPS, OrderLine, OrderTotals, ProductSnapshot, compute_totals};
