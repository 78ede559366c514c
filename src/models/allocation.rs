use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{ProductId, WarehouseId};

/// Allocations at or below this size are not worth a movement (1e-6).
pub const ALLOCATION_EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 6);

/// Remaining need at or below this is treated as satisfied (1e-9).
pub const QUANTITY_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 9);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEntry {
    pub warehouse_id: WarehouseId,
    pub quantity: Decimal,
}

/// Why a candidate warehouse contributed nothing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnknownWarehouse,
    MissingStockLocation,
    MissingOutboundType,
    MissingInternalType,
    NotAllowedForProduct,
    IsHub,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::UnknownWarehouse => "unknown_warehouse",
            SkipReason::MissingStockLocation => "missing_stock_location",
            SkipReason::MissingOutboundType => "missing_outbound_type",
            SkipReason::MissingInternalType => "missing_internal_type",
            SkipReason::NotAllowedForProduct => "not_allowed_for_product",
            SkipReason::IsHub => "is_hub",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSource {
    pub warehouse_id: WarehouseId,
    pub reason: SkipReason,
}

impl SkippedSource {
    pub fn new(warehouse_id: WarehouseId, reason: SkipReason) -> Self {
        Self {
            warehouse_id,
            reason,
        }
    }
}

/// Result of apportioning a required quantity across candidate warehouses.
///
/// `allocated_total() + shortfall == requested` always holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub product_id: ProductId,
    pub requested: Decimal,
    /// In the order the candidates were drained.
    pub entries: Vec<AllocationEntry>,
    pub shortfall: Decimal,
    #[serde(default)]
    pub skipped: Vec<SkippedSource>,
}

impl Allocation {
    pub fn empty(product_id: ProductId, requested: Decimal) -> Self {
        Self {
            product_id,
            requested,
            entries: Vec::new(),
            shortfall: requested,
            skipped: Vec::new(),
        }
    }

    pub fn allocated_total(&self) -> Decimal {
        self.entries.iter().map(|e| e.quantity).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.shortfall <= QUANTITY_TOLERANCE
    }

    pub fn quantity_for(&self, warehouse_id: WarehouseId) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.warehouse_id == warehouse_id)
            .map(|e| e.quantity)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn epsilon_constants() {
        assert_eq!(ALLOCATION_EPSILON, dec!(0.000001));
        assert_eq!(QUANTITY_TOLERANCE, dec!(0.000000001));
    }

    #[test]
    fn empty_allocation_is_all_shortfall() {
        let allocation = Allocation::empty(1, dec!(4.5));
        assert_eq!(allocation.allocated_total(), Decimal::ZERO);
        assert_eq!(allocation.shortfall, dec!(4.5));
        assert!(!allocation.is_complete());
        assert_eq!(allocation.quantity_for(9), Decimal::ZERO);
    }
}
