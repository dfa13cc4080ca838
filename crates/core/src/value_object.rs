//! Value object marker: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects carry no identity: two cash counts with the same lines are the
/// same count, and `Money::from_cents(100) == Money::new(1, 0)`. They are
/// immutable; "changing" one means building a new value.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct DenominationCount { face_value: Money, count: u32 }
///
/// impl ValueObject for DenominationCount {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
