use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use stocklot_core::{AggregateId, DomainError, DomainResult, Entity, VariantId};

/// Stock alerts fire at or below this level when a variant does not set
/// its own threshold.
pub const DEFAULT_MIN_STOCK_LEVEL: i64 = 10;

/// A sellable unit.
///
/// Created and edited by the catalog subsystem; the stock engine reads it
/// and writes only the tax metadata (`hsn_code`, `tax_rate_bps`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    /// Owning product in the catalog subsystem.
    pub product_id: AggregateId,
    pub sku: String,
    /// Selling price in minor currency units.
    pub price: i64,
    /// Standard cost in minor currency units.
    pub cost_price: i64,
    pub min_stock_level: i64,
    pub reorder_quantity: i64,
    /// Tax rate in basis points (e.g. 1200 = 12%).
    pub tax_rate_bps: u32,
    pub hsn_code: Option<String>,
}

impl Variant {
    pub fn new(id: VariantId, product_id: AggregateId, sku: impl Into<String>) -> Self {
        Self {
            id,
            product_id,
            sku: sku.into(),
            price: 0,
            cost_price: 0,
            min_stock_level: DEFAULT_MIN_STOCK_LEVEL,
            reorder_quantity: 0,
            tax_rate_bps: 0,
            hsn_code: None,
        }
    }
}

impl Entity for Variant {
    type Id = VariantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Read + tax-update interface onto the catalog's variants.
pub trait VariantDirectory: Send + Sync {
    fn get(&self, id: VariantId) -> Option<Variant>;

    fn list(&self) -> Vec<Variant>;

    /// Update the tax metadata captured on goods receipt.
    ///
    /// `None` fields are left untouched.
    fn update_tax_metadata(
        &self,
        id: VariantId,
        hsn_code: Option<String>,
        tax_rate_bps: Option<u32>,
    ) -> DomainResult<()>;
}

impl<D> VariantDirectory for Arc<D>
where
    D: VariantDirectory + ?Sized,
{
    fn get(&self, id: VariantId) -> Option<Variant> {
        (**self).get(id)
    }

    fn list(&self) -> Vec<Variant> {
        (**self).list()
    }

    fn update_tax_metadata(
        &self,
        id: VariantId,
        hsn_code: Option<String>,
        tax_rate_bps: Option<u32>,
    ) -> DomainResult<()> {
        (**self).update_tax_metadata(id, hsn_code, tax_rate_bps)
    }
}

/// In-memory variant directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryVariantDirectory {
    inner: RwLock<HashMap<VariantId, Variant>>,
}

impl InMemoryVariantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace a variant (standing in for the catalog subsystem).
    pub fn upsert(&self, variant: Variant) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(variant.id, variant);
        }
    }
}

impl VariantDirectory for InMemoryVariantDirectory {
    fn get(&self, id: VariantId) -> Option<Variant> {
        let map = self.inner.read().ok()?;
        map.get(&id).cloned()
    }

    fn list(&self) -> Vec<Variant> {
        match self.inner.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => vec![],
        }
    }

    fn update_tax_metadata(
        &self,
        id: VariantId,
        hsn_code: Option<String>,
        tax_rate_bps: Option<u32>,
    ) -> DomainResult<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| DomainError::invariant("variant directory lock poisoned"))?;

        let variant = map.get_mut(&id).ok_or(DomainError::NotFound)?;
        if let Some(hsn) = hsn_code {
            variant.hsn_code = Some(hsn);
        }
        if let Some(rate) = tax_rate_bps {
            variant.tax_rate_bps = rate;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_variant_uses_default_min_stock_level() {
        let v = Variant::new(VariantId::new(), AggregateId::new(), "SKU-1");
        assert_eq!(v.min_stock_level, DEFAULT_MIN_STOCK_LEVEL);
    }

    #[test]
    fn tax_update_on_unknown_variant_is_not_found() {
        let dir = InMemoryVariantDirectory::new();
        let err = dir
            .update_tax_metadata(VariantId::new(), Some("3004".to_string()), Some(1200))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound));
    }

    #[test]
    fn tax_update_leaves_unset_fields_untouched() {
        let dir = InMemoryVariantDirectory::new();
        let mut v = Variant::new(VariantId::new(), AggregateId::new(), "SKU-1");
        v.hsn_code = Some("3004".to_string());
        let id = v.id;
        dir.upsert(v);

        dir.update_tax_metadata(id, None, Some(500)).unwrap();

        let updated = dir.get(id).unwrap();
        assert_eq!(updated.hsn_code.as_deref(), Some("3004"));
        assert_eq!(updated.tax_rate_bps, 500);
    }
}
