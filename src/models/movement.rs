use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    LocationId, OperationTypeId, OrderId, OrderLineId, ProcurementGroupId, ProductId, WarehouseId,
};

/// Lifecycle of a movement inside the Movement Ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementState {
    Draft,
    Confirmed,
    /// Waiting on a predecessor or on stock (backordered).
    Waiting,
    /// Stock reserved at the source location.
    Assigned,
    Done,
    Cancelled,
}

impl MovementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementState::Draft => "draft",
            MovementState::Confirmed => "confirmed",
            MovementState::Waiting => "waiting",
            MovementState::Assigned => "assigned",
            MovementState::Done => "done",
            MovementState::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(MovementState::Draft),
            "confirmed" => Some(MovementState::Confirmed),
            "waiting" => Some(MovementState::Waiting),
            "assigned" => Some(MovementState::Assigned),
            "done" => Some(MovementState::Done),
            "cancelled" => Some(MovementState::Cancelled),
            _ => None,
        }
    }

    /// States a reservation pass may still act on.
    pub fn is_reservable(&self) -> bool {
        matches!(self, MovementState::Confirmed | MovementState::Waiting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Outbound delivery to the customer.
    Delivery,
    /// Warehouse-to-warehouse (or via transit) transfer.
    InternalTransfer,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Delivery => "delivery",
            MovementKind::InternalTransfer => "internal_transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "delivery" => Some(MovementKind::Delivery),
            "internal_transfer" => Some(MovementKind::InternalTransfer),
            _ => None,
        }
    }
}

/// A movement as planned by the builder, before the ledger has accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementSpec {
    pub id: Uuid,
    pub kind: MovementKind,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub source_location_id: LocationId,
    pub destination_location_id: LocationId,
    pub order_id: OrderId,
    pub order_line_id: OrderLineId,
    pub procurement_group_id: Option<ProcurementGroupId>,
    /// Warehouse whose operation type governs the movement.
    pub warehouse_id: WarehouseId,
    /// The warehouse the quantity was allocated from.
    pub source_warehouse_id: WarehouseId,
    pub operation_type_id: OperationTypeId,
    pub origin: String,
    pub propagate_cancel: bool,
    pub predecessor_id: Option<Uuid>,
    pub successor_id: Option<Uuid>,
}

/// A movement recorded by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: Uuid,
    pub kind: MovementKind,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub source_location_id: LocationId,
    pub destination_location_id: LocationId,
    pub order_id: OrderId,
    pub order_line_id: OrderLineId,
    pub procurement_group_id: Option<ProcurementGroupId>,
    pub warehouse_id: WarehouseId,
    pub source_warehouse_id: WarehouseId,
    pub operation_type_id: OperationTypeId,
    pub origin: String,
    pub propagate_cancel: bool,
    pub predecessor_id: Option<Uuid>,
    pub successor_id: Option<Uuid>,
    pub state: MovementState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Movement {
    /// Materializes a planned movement in the `Draft` state.
    pub fn from_spec(spec: MovementSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: spec.id,
            kind: spec.kind,
            product_id: spec.product_id,
            quantity: spec.quantity,
            source_location_id: spec.source_location_id,
            destination_location_id: spec.destination_location_id,
            order_id: spec.order_id,
            order_line_id: spec.order_line_id,
            procurement_group_id: spec.procurement_group_id,
            warehouse_id: spec.warehouse_id,
            source_warehouse_id: spec.source_warehouse_id,
            operation_type_id: spec.operation_type_id,
            origin: spec.origin,
            propagate_cancel: spec.propagate_cancel,
            predecessor_id: spec.predecessor_id,
            successor_id: spec.successor_id,
            state: MovementState::Draft,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_string_conversion() {
        assert_eq!(MovementState::Assigned.as_str(), "assigned");
        assert_eq!(MovementState::from_str("waiting"), Some(MovementState::Waiting));
        assert_eq!(MovementState::from_str("reserved"), None);
        assert_eq!(
            MovementKind::from_str(MovementKind::InternalTransfer.as_str()),
            Some(MovementKind::InternalTransfer)
        );
    }

    #[test]
    fn only_pending_states_are_reservable() {
        assert!(MovementState::Confirmed.is_reservable());
        assert!(MovementState::Waiting.is_reservable());
        assert!(!MovementState::Draft.is_reservable());
        assert!(!MovementState::Assigned.is_reservable());
        assert!(!MovementState::Done.is_reservable());
    }
}
