//! `retailpos-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod payment;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult, StockShortfall};
pub use id::{AggregateId, BranchId, ProductId, UserId, VariantId};
pub use money::Money;
pub use payment::PaymentMethod;
pub use value_object::ValueObject;
