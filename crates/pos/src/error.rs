//! Errors surfaced to callers of the point-of-sale service.

use thiserror::Error;
use uuid::Uuid;

use retailpos_auth::AuthzError;
use retailpos_core::{DomainError, StockShortfall};
use retailpos_infra::command_dispatcher::DispatchError;

#[derive(Debug, Error)]
pub enum PosError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Every line of the request that could not be reserved.
    #[error("insufficient stock: {}", describe_shortfalls(.0))]
    InsufficientStock(Vec<StockShortfall>),

    #[error("validation failed: {0}")]
    Validation(String),

    /// Lost the race for a stream too many times in a row.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Details are only in the logs, under `reference`.
    #[error("internal error (ref {reference})")]
    Internal { reference: Uuid },
}

impl PosError {
    /// Log `detail` at error level and hand back an opaque reference.
    pub fn internal(detail: impl core::fmt::Display) -> Self {
        let reference = Uuid::now_v7();
        tracing::error!(%reference, error = %detail, "internal failure");
        PosError::Internal { reference }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        PosError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        PosError::NotFound(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        PosError::InvalidState(msg.into())
    }

    /// Short machine-friendly name, used in audit records and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PosError::NotFound(_) => "not_found",
            PosError::InvalidState(_) => "invalid_state",
            PosError::InsufficientStock(_) => "insufficient_stock",
            PosError::Validation(_) => "validation",
            PosError::ConcurrencyConflict(_) => "concurrency_conflict",
            PosError::Unauthorized(_) => "unauthorized",
            PosError::Internal { .. } => "internal",
        }
    }
}

fn describe_shortfalls(shortfalls: &[StockShortfall]) -> String {
    shortfalls.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl From<DispatchError> for PosError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::Concurrency(msg) => PosError::ConcurrencyConflict(msg),
            DispatchError::Validation(msg) => PosError::Validation(msg),
            DispatchError::InvalidState(msg) => PosError::InvalidState(msg),
            DispatchError::NotFound(msg) => PosError::NotFound(msg),
            DispatchError::Unauthorized => PosError::Unauthorized("operation not permitted".to_string()),
            DispatchError::InsufficientStock(s) => PosError::InsufficientStock(vec![s]),
            other @ (DispatchError::Deserialize(_) | DispatchError::Store(_) | DispatchError::Publish(_)) => {
                PosError::internal(other)
            }
        }
    }
}

impl From<DomainError> for PosError {
    fn from(value: DomainError) -> Self {
        DispatchError::from(value).into()
    }
}

impl From<AuthzError> for PosError {
    fn from(value: AuthzError) -> Self {
        PosError::Unauthorized(value.to_string())
    }
}
