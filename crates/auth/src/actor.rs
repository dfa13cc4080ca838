use serde::{Deserialize, Serialize};

use retailpos_core::UserId;

use crate::Role;

/// A resolved, authenticated person acting on the point of sale.
///
/// Always passed explicitly into operations; nothing reads a "current user"
/// from ambient state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub display_name: String,
    pub roles: Vec<Role>,
    pub active: bool,
}

impl Actor {
    pub fn new(user_id: UserId, display_name: impl Into<String>, roles: Vec<Role>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            roles,
            active: true,
        }
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_supervisor_or_admin(&self) -> bool {
        self.has_role(&Role::SUPERVISOR) || self.has_role(&Role::ADMIN)
    }
}
