use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{Movement, MovementKind, MovementState};

/// Persisted movement record (one row per hop).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_moves")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub kind: String,
    pub product_id: i64,
    #[sea_orm(column_type = "Decimal(Some((16, 6)))")]
    pub quantity: Decimal,
    pub source_location_id: i64,
    pub destination_location_id: i64,
    pub order_id: i64,
    pub order_line_id: i64,
    pub procurement_group_id: Option<i64>,
    pub warehouse_id: i64,
    pub source_warehouse_id: i64,
    pub operation_type_id: i64,
    pub origin: String,
    pub propagate_cancel: bool,
    pub predecessor_id: Option<Uuid>,
    pub successor_id: Option<Uuid>,
    pub state: String, // Storing as string in DB, converted to/from MovementState
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Movement> for ActiveModel {
    fn from(movement: &Movement) -> Self {
        ActiveModel {
            id: Set(movement.id),
            kind: Set(movement.kind.as_str().to_string()),
            product_id: Set(movement.product_id),
            quantity: Set(movement.quantity),
            source_location_id: Set(movement.source_location_id),
            destination_location_id: Set(movement.destination_location_id),
            order_id: Set(movement.order_id),
            order_line_id: Set(movement.order_line_id),
            procurement_group_id: Set(movement.procurement_group_id),
            warehouse_id: Set(movement.warehouse_id),
            source_warehouse_id: Set(movement.source_warehouse_id),
            operation_type_id: Set(movement.operation_type_id),
            origin: Set(movement.origin.clone()),
            propagate_cancel: Set(movement.propagate_cancel),
            predecessor_id: Set(movement.predecessor_id),
            successor_id: Set(movement.successor_id),
            state: Set(movement.state.as_str().to_string()),
            created_at: Set(movement.created_at),
            updated_at: Set(movement.updated_at),
        }
    }
}

impl TryFrom<Model> for Movement {
    type Error = ServiceError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let state = MovementState::from_str(&model.state).ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Movement {} has unknown state '{}'",
                model.id, model.state
            ))
        })?;
        let kind = MovementKind::from_str(&model.kind).ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Movement {} has unknown kind '{}'",
                model.id, model.kind
            ))
        })?;

        Ok(Movement {
            id: model.id,
            kind,
            product_id: model.product_id,
            quantity: model.quantity,
            source_location_id: model.source_location_id,
            destination_location_id: model.destination_location_id,
            order_id: model.order_id,
            order_line_id: model.order_line_id,
            procurement_group_id: model.procurement_group_id,
            warehouse_id: model.warehouse_id,
            source_warehouse_id: model.source_warehouse_id,
            operation_type_id: model.operation_type_id,
            origin: model.origin,
            propagate_cancel: model.propagate_cancel,
            predecessor_id: model.predecessor_id,
            successor_id: model.successor_id,
            state,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
