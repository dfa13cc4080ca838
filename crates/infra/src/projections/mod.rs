//! Projection implementations (read model builders).
//!
//! Projections consume published envelopes and build query-optimized read
//! models. They are rebuildable from the event streams and idempotent under
//! at-least-once delivery.

pub mod stock_levels;

pub use stock_levels::{StockLevelRow, StockLevelsProjection, StockProjectionError};
