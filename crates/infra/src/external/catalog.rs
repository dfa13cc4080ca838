use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use retailpos_core::{Money, VariantId};
use retailpos_sales::ProductSnapshot;

/// What the catalog knows about a sellable variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub snapshot: ProductSnapshot,
    pub base_price: Money,
}

/// Read-only product catalog.
pub trait Catalog: Send + Sync {
    fn resolve(&self, variant_id: VariantId) -> Option<CatalogEntry>;
}

impl<C> Catalog for Arc<C>
where
    C: Catalog + ?Sized,
{
    fn resolve(&self, variant_id: VariantId) -> Option<CatalogEntry> {
        (**self).resolve(variant_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    entries: RwLock<HashMap<VariantId, CatalogEntry>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, variant_id: VariantId, entry: CatalogEntry) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(variant_id, entry);
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn resolve(&self, variant_id: VariantId) -> Option<CatalogEntry> {
        self.entries.read().ok()?.get(&variant_id).cloned()
    }
}
