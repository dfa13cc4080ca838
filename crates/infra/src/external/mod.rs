//! Ports to collaborators owned by other systems, with in-memory adapters.

pub mod branches;
pub mod catalog;

pub use branches::{BranchDirectory, BranchInfo, InMemoryBranchDirectory};
pub use catalog::{Catalog, CatalogEntry, InMemoryCatalog};
