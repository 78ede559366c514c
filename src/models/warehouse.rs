use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{CompanyId, LocationId, OperationTypeId, WarehouseId};

/// Priority assigned to warehouses that do not carry an explicit rank.
pub const UNRANKED_PRIORITY: i32 = i32::MAX;

/// A stock-holding site as seen by the sourcing core.
///
/// Read-only here; owned by inventory configuration on the host platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Warehouse {
    pub id: WarehouseId,

    #[validate(length(min = 1, max = 100))]
    pub name: String,

    pub company_id: CompanyId,

    /// Default stock location stock is picked from and receipted into.
    #[serde(default)]
    pub stock_location_id: Option<LocationId>,

    /// Outbound delivery operation type.
    #[serde(default)]
    pub out_type_id: Option<OperationTypeId>,

    /// Internal transfer operation type.
    #[serde(default)]
    pub int_type_id: Option<OperationTypeId>,

    #[serde(default)]
    pub is_ecommerce_source: bool,

    /// Lower numbers are preferred.
    #[serde(default)]
    pub ecommerce_priority: Option<i32>,

    #[serde(default)]
    pub is_distribution_center: bool,
}

impl Warehouse {
    pub fn new(id: WarehouseId, name: impl Into<String>, company_id: CompanyId) -> Self {
        Self {
            id,
            name: name.into(),
            company_id,
            stock_location_id: None,
            out_type_id: None,
            int_type_id: None,
            is_ecommerce_source: false,
            ecommerce_priority: None,
            is_distribution_center: false,
        }
    }

    pub fn with_stock_location(mut self, location_id: LocationId) -> Self {
        self.stock_location_id = Some(location_id);
        self
    }

    pub fn with_out_type(mut self, type_id: OperationTypeId) -> Self {
        self.out_type_id = Some(type_id);
        self
    }

    pub fn with_int_type(mut self, type_id: OperationTypeId) -> Self {
        self.int_type_id = Some(type_id);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.ecommerce_priority = Some(priority);
        self
    }

    pub fn as_ecommerce_source(mut self) -> Self {
        self.is_ecommerce_source = true;
        self
    }

    /// A distribution center is always usable as an e-commerce source.
    pub fn as_distribution_center(mut self) -> Self {
        self.is_distribution_center = true;
        self.is_ecommerce_source = true;
        self
    }

    /// Deterministic ordering key: explicit rank first, identity as tie-break.
    pub fn sort_key(&self) -> (i32, WarehouseId) {
        (self.ecommerce_priority.unwrap_or(UNRANKED_PRIORITY), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranked_warehouses_sort_before_unranked() {
        let mut warehouses = vec![
            Warehouse::new(1, "Unranked", 1),
            Warehouse::new(7, "Rank 5", 1).with_priority(5),
            Warehouse::new(3, "Rank 5 low id", 1).with_priority(5),
            Warehouse::new(9, "Rank 1", 1).with_priority(1),
        ];
        warehouses.sort_by_key(Warehouse::sort_key);
        let ids: Vec<_> = warehouses.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![9, 3, 7, 1]);
    }

    #[test]
    fn distribution_center_is_a_source() {
        let hub = Warehouse::new(1, "DC", 1).as_distribution_center();
        assert!(hub.is_ecommerce_source);
    }

    #[test]
    fn empty_name_fails_validation() {
        let wh = Warehouse::new(1, "", 1);
        assert!(wh.validate().is_err());
    }
}
