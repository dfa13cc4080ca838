use std::collections::BTreeSet;

use thiserror::Error;

use retailpos_core::UserId;

use crate::{Actor, Permission, Role};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("user {0} is inactive")]
    Inactive(UserId),

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    #[error("forbidden: only the shift's cashier or a supervisor may close it")]
    NotShiftOwner,
}

const CASHIER_PERMISSIONS: &[Permission] = &[
    Permission::SHIFT_OPEN,
    Permission::SALE_REGISTER,
    Permission::SALE_CANCEL,
    Permission::PAYMENT_CONFIRM,
    Permission::MOVEMENT_RECORD,
];

const SUPERVISOR_PERMISSIONS: &[Permission] = &[
    Permission::SHIFT_OPEN,
    Permission::SHIFT_CLOSE_ANY,
    Permission::SHIFT_ANNOTATE,
    Permission::SALE_REGISTER,
    Permission::SALE_CANCEL,
    Permission::PAYMENT_CONFIRM,
    Permission::MOVEMENT_RECORD,
    Permission::OUTFLOW_AUTHORIZE,
    Permission::REGISTER_MANAGE,
    Permission::STOCK_MANAGE,
];

const ADMIN_PERMISSIONS: &[Permission] = &[Permission::WILDCARD];

fn role_permissions(role: &Role) -> &'static [Permission] {
    match role.as_str() {
        "cashier" => CASHIER_PERMISSIONS,
        "supervisor" => SUPERVISOR_PERMISSIONS,
        "admin" => ADMIN_PERMISSIONS,
        _ => &[],
    }
}

/// Union of the permissions granted by every role the actor holds.
pub fn effective_permissions(actor: &Actor) -> BTreeSet<&'static str> {
    actor
        .roles
        .iter()
        .flat_map(role_permissions)
        .map(Permission::as_str)
        .collect()
}

/// Check one permission for an actor.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(actor: &Actor, required: &Permission) -> Result<(), AuthzError> {
    if !actor.active {
        return Err(AuthzError::Inactive(actor.user_id));
    }

    let perms = effective_permissions(actor);
    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        tracing::debug!(user_id = %actor.user_id, permission = %required, "permission denied");
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Closing guard: the shift's own cashier, or anyone allowed to close any shift.
pub fn authorize_shift_close(actor: &Actor, shift_cashier: UserId) -> Result<(), AuthzError> {
    if !actor.active {
        return Err(AuthzError::Inactive(actor.user_id));
    }
    if actor.user_id == shift_cashier {
        return Ok(());
    }
    authorize(actor, &Permission::SHIFT_CLOSE_ANY).map_err(|_| AuthzError::NotShiftOwner)
}
