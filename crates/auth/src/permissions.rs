use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier.
///
/// Permissions are opaque strings (e.g. "pos.shift.open"). The wildcard `"*"`
/// grants everything and is what the admin role carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));

    pub const SHIFT_OPEN: Permission = Permission(Cow::Borrowed("pos.shift.open"));
    /// Close a shift that belongs to another cashier.
    pub const SHIFT_CLOSE_ANY: Permission = Permission(Cow::Borrowed("pos.shift.close_any"));
    pub const SHIFT_ANNOTATE: Permission = Permission(Cow::Borrowed("pos.shift.annotate"));

    pub const SALE_REGISTER: Permission = Permission(Cow::Borrowed("pos.sale.register"));
    pub const SALE_CANCEL: Permission = Permission(Cow::Borrowed("pos.sale.cancel"));
    pub const PAYMENT_CONFIRM: Permission = Permission(Cow::Borrowed("pos.payment.confirm"));

    pub const MOVEMENT_RECORD: Permission = Permission(Cow::Borrowed("cash.movement.record"));
    /// Expenses, withdrawals and refunds take money out of the drawer.
    pub const OUTFLOW_AUTHORIZE: Permission = Permission(Cow::Borrowed("cash.outflow.authorize"));

    pub const REGISTER_MANAGE: Permission = Permission(Cow::Borrowed("pos.register.manage"));
    pub const STOCK_MANAGE: Permission = Permission(Cow::Borrowed("inventory.stock.manage"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
