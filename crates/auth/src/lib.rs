//! `retailpos-auth`: who is acting, and what they may do.
//!
//! Decoupled from transport and storage: callers resolve an [`Actor`] through an
//! [`IdentityProvider`] and pass it explicitly into every operation.

pub mod actor;
pub mod authorize;
pub mod identity;
pub mod permissions;
pub mod roles;

pub use actor::Actor;
pub use authorize::{AuthzError, authorize, authorize_shift_close, effective_permissions};
pub use identity::{IdentityProvider, InMemoryIdentityProvider};
pub use permissions::Permission;
pub use roles::Role;
