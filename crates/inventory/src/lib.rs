//! Inventory domain module (event-sourced).
//!
//! One stock record per (variant, branch) pair, with reserve/release/confirm/ingest
//! semantics. Pure domain logic: no IO, no storage.

pub mod record;

pub use record::{
    ConfirmReservation, IngestStock, InventoryCommand, InventoryEvent, ProvisionStock,
    ReleaseStock, ReservationConfirmed, ReserveStock, StockLevels, StockProvisioned,
    StockReceived, StockRecord, StockRecordId, StockReleased, StockReserved,
    weighted_average_cost,
};
