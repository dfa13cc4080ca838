use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use retailpos_core::BranchId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub id: BranchId,
    pub name: String,
    pub active: bool,
}

/// Read-only directory of store locations.
pub trait BranchDirectory: Send + Sync {
    fn resolve(&self, branch_id: BranchId) -> Option<BranchInfo>;
}

impl<D> BranchDirectory for Arc<D>
where
    D: BranchDirectory + ?Sized,
{
    fn resolve(&self, branch_id: BranchId) -> Option<BranchInfo> {
        (**self).resolve(branch_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBranchDirectory {
    branches: RwLock<HashMap<BranchId, BranchInfo>>,
}

impl InMemoryBranchDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, branch: BranchInfo) {
        if let Ok(mut branches) = self.branches.write() {
            branches.insert(branch.id, branch);
        }
    }
}

impl BranchDirectory for InMemoryBranchDirectory {
    fn resolve(&self, branch_id: BranchId) -> Option<BranchInfo> {
        self.branches.read().ok()?.get(&branch_id).cloned()
    }
}
