use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::errors::ServiceError;
use crate::models::{CompanyId, Warehouse, WarehouseId};

/// Read-only view over inventory configuration.
#[async_trait]
pub trait WarehouseDirectory: Send + Sync {
    async fn get(&self, id: WarehouseId) -> Result<Option<Warehouse>, ServiceError>;

    async fn list(&self, company_id: CompanyId) -> Result<Vec<Warehouse>, ServiceError>;
}

#[derive(Debug, Default)]
pub struct InMemoryWarehouseDirectory {
    warehouses: DashMap<WarehouseId, Warehouse>,
}

impl InMemoryWarehouseDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_warehouses(warehouses: impl IntoIterator<Item = Warehouse>) -> Self {
        let directory = Self::new();
        for warehouse in warehouses {
            directory.insert(warehouse);
        }
        directory
    }

    pub fn insert(&self, warehouse: Warehouse) {
        self.warehouses.insert(warehouse.id, warehouse);
    }
}

#[async_trait]
impl WarehouseDirectory for InMemoryWarehouseDirectory {
    async fn get(&self, id: WarehouseId) -> Result<Option<Warehouse>, ServiceError> {
        Ok(self.warehouses.get(&id).map(|w| w.clone()))
    }

    async fn list(&self, company_id: CompanyId) -> Result<Vec<Warehouse>, ServiceError> {
        let mut warehouses: Vec<Warehouse> = self
            .warehouses
            .iter()
            .filter(|w| w.company_id == company_id)
            .map(|w| w.clone())
            .collect();
        warehouses.sort_by_key(|w| w.id);
        Ok(warehouses)
    }
}

#[async_trait]
impl<T: WarehouseDirectory + ?Sized> WarehouseDirectory for Arc<T> {
    async fn get(&self, id: WarehouseId) -> Result<Option<Warehouse>, ServiceError> {
        (**self).get(id).await
    }

    async fn list(&self, company_id: CompanyId) -> Result<Vec<Warehouse>, ServiceError> {
        (**self).list(company_id).await
    }
}

/// Warehouses a storefront may offer as sources for a company.
///
/// Flagged e-commerce sources other than the hub, best-ranked first. Without
/// any flagged warehouse the hub alone is offered, and without a hub the
/// company's lowest-id warehouse.
pub async fn eligible_sources<D: WarehouseDirectory + ?Sized>(
    directory: &D,
    company_id: CompanyId,
    hub_warehouse_id: Option<WarehouseId>,
) -> Result<Vec<Warehouse>, ServiceError> {
    let all = directory.list(company_id).await?;

    let mut flagged: Vec<Warehouse> = all
        .iter()
        .filter(|w| w.is_ecommerce_source && Some(w.id) != hub_warehouse_id)
        .cloned()
        .collect();

    if !flagged.is_empty() {
        flagged.sort_by_key(Warehouse::sort_key);
        return Ok(flagged);
    }

    if let Some(hub) = hub_warehouse_id.and_then(|id| all.iter().find(|w| w.id == id)) {
        debug!(company_id, hub = hub.id, "No flagged sources, offering the hub");
        return Ok(vec![hub.clone()]);
    }

    debug!(company_id, "No flagged sources or hub, offering the first warehouse");
    Ok(all.into_iter().min_by_key(|w| w.id).into_iter().collect())
}
