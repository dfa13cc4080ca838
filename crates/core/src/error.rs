//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{BranchId, VariantId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// A reservation that could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortfall {
    pub variant_id: VariantId,
    pub branch_id: BranchId,
    pub requested: i64,
    pub reservable: i64,
}

impl core::fmt::Display for StockShortfall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "variant {} at branch {}: requested {}, reservable {}",
            self.variant_id, self.branch_id, self.requested, self.reservable
        )
    }
}

/// Domain-level error.
///
/// Deterministic business failures only (validation, state guards, stock,
/// conflicts). Storage and transport failures live in the infra layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input, rejected before any state is touched.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The aggregate is not in a state that allows the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The addressed aggregate does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Stale version / optimistic concurrency.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller is not allowed to perform the operation.
    #[error("unauthorized")]
    Unauthorized,

    /// A reservation would exceed the reservable quantity.
    #[error("insufficient stock: {0}")]
    InsufficientStock(StockShortfall),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}
