//! `retailpos-pos`: the point-of-sale transaction core.
//!
//! [`PosService`] coordinates the inventory, cash and sales aggregates so that
//! a sale, its stock reservations and its cash movement are always decided and
//! committed together.

pub mod error;
pub mod report;
pub mod sales;
pub mod service;
pub mod shifts;
pub mod stock;

pub use error::PosError;
pub use report::{ItemLine, KindSummary, ShiftReport};
pub use sales::{RefundSaleRequest, RegisterSaleRequest, SaleLineRequest};
pub use service::{EnvelopeBus, PosPorts, PosService};
pub use shifts::{CloseShiftRequest, MovementRequest, OpenShiftRequest, ProvisionRegisterRequest};
pub use stock::ProvisionStockRequest;
