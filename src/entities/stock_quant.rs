use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// On-hand stock of one product at one location, with the reserved part.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_quants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: i64,
    pub location_id: i64,
    #[sea_orm(column_type = "Decimal(Some((16, 6)))")]
    pub quantity: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 6)))")]
    pub reserved_quantity: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Unreserved quantity; may be negative when the quant is over-reserved.
    pub fn unreserved(&self) -> Decimal {
        self.quantity - self.reserved_quantity
    }
}
