use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use stocklot_core::{Entity, WarehouseId};

/// A physical stock location. Managed by an external subsystem; referenced,
/// never mutated, by the stock engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
    pub active: bool,
}

impl Warehouse {
    pub fn new(id: WarehouseId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            active: true,
        }
    }
}

impl Entity for Warehouse {
    type Id = WarehouseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Read interface onto the warehouse registry.
pub trait WarehouseDirectory: Send + Sync {
    fn get(&self, id: WarehouseId) -> Option<Warehouse>;

    fn list_active(&self) -> Vec<Warehouse>;
}

impl<D> WarehouseDirectory for Arc<D>
where
    D: WarehouseDirectory + ?Sized,
{
    fn get(&self, id: WarehouseId) -> Option<Warehouse> {
        (**self).get(id)
    }

    fn list_active(&self) -> Vec<Warehouse> {
        (**self).list_active()
    }
}

/// In-memory warehouse directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryWarehouseDirectory {
    inner: RwLock<HashMap<WarehouseId, Warehouse>>,
}

impl InMemoryWarehouseDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, warehouse: Warehouse) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(warehouse.id, warehouse);
        }
    }
}

impl WarehouseDirectory for InMemoryWarehouseDirectory {
    fn get(&self, id: WarehouseId) -> Option<Warehouse> {
        let map = self.inner.read().ok()?;
        map.get(&id).cloned()
    }

    fn list_active(&self) -> Vec<Warehouse> {
        match self.inner.read() {
            Ok(map) => map.values().filter(|w| w.active).cloned().collect(),
            Err(_) => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_active_skips_deactivated_warehouses() {
        let dir = InMemoryWarehouseDirectory::new();
        dir.upsert(Warehouse::new(WarehouseId::new(), "Central"));

        let mut closed = Warehouse::new(WarehouseId::new(), "Old Depot");
        closed.active = false;
        dir.upsert(closed);

        let active = dir.list_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Central");
    }
}
