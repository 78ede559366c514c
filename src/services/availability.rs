//! Availability Oracle
//!
//! Answers "how much of product P is unreserved at location L". The core only
//! reads through this port; it never locks or reserves stock itself.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::entities::stock_quant::{self, Entity as StockQuantEntity};
use crate::errors::ServiceError;
use crate::models::{LocationId, ProductId};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AvailabilityOracle: Send + Sync {
    /// Unreserved quantity, never negative.
    async fn available(
        &self,
        product_id: ProductId,
        location_id: LocationId,
    ) -> Result<Decimal, ServiceError>;
}

/// In-memory stock snapshot keyed by (product, location).
#[derive(Debug, Default)]
pub struct InMemoryAvailability {
    stock: DashMap<(ProductId, LocationId), Decimal>,
}

impl InMemoryAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, product_id: ProductId, location_id: LocationId, quantity: Decimal) {
        self.stock.insert((product_id, location_id), quantity);
    }

    pub fn add(&self, product_id: ProductId, location_id: LocationId, quantity: Decimal) {
        *self
            .stock
            .entry((product_id, location_id))
            .or_insert(Decimal::ZERO) += quantity;
    }

    /// Takes `quantity` out of the unreserved pool if it is fully covered.
    pub fn reserve(&self, product_id: ProductId, location_id: LocationId, quantity: Decimal) -> bool {
        match self.stock.get_mut(&(product_id, location_id)) {
            Some(mut available) if *available >= quantity => {
                *available -= quantity;
                true
            }
            _ => false,
        }
    }

    pub fn snapshot(&self, product_id: ProductId, location_id: LocationId) -> Decimal {
        self.stock
            .get(&(product_id, location_id))
            .map(|q| *q)
            .unwrap_or(Decimal::ZERO)
    }
}

#[async_trait]
impl AvailabilityOracle for InMemoryAvailability {
    async fn available(
        &self,
        product_id: ProductId,
        location_id: LocationId,
    ) -> Result<Decimal, ServiceError> {
        Ok(self.snapshot(product_id, location_id).max(Decimal::ZERO))
    }
}

#[async_trait]
impl<T: AvailabilityOracle + ?Sized> AvailabilityOracle for Arc<T> {
    async fn available(
        &self,
        product_id: ProductId,
        location_id: LocationId,
    ) -> Result<Decimal, ServiceError> {
        (**self).available(product_id, location_id).await
    }
}

/// Availability read from the `stock_quants` table.
#[derive(Clone)]
pub struct DbAvailability {
    db: Arc<DatabaseConnection>,
}

impl DbAvailability {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AvailabilityOracle for DbAvailability {
    #[instrument(skip(self))]
    async fn available(
        &self,
        product_id: ProductId,
        location_id: LocationId,
    ) -> Result<Decimal, ServiceError> {
        let db = &*self.db;

        let quants = StockQuantEntity::find()
            .filter(stock_quant::Column::ProductId.eq(product_id))
            .filter(stock_quant::Column::LocationId.eq(location_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let unreserved: Decimal = quants.iter().map(stock_quant::Model::unreserved).sum();
        debug!(product_id, location_id, %unreserved, "Read unreserved stock");

        Ok(unreserved.max(Decimal::ZERO))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn unknown_stock_reads_as_zero() {
        let oracle = InMemoryAvailability::new();
        assert_eq!(oracle.available(1, 10).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn negative_stock_is_clamped() {
        let oracle = InMemoryAvailability::new();
        oracle.set(1, 10, dec!(-3));
        assert_eq!(oracle.available(1, 10).await.unwrap(), Decimal::ZERO);
        assert_eq!(oracle.snapshot(1, 10), dec!(-3));
    }

    #[test]
    fn reserve_requires_full_cover() {
        let oracle = InMemoryAvailability::new();
        oracle.set(1, 10, dec!(5));
        assert!(!oracle.reserve(1, 10, dec!(6)));
        assert!(oracle.reserve(1, 10, dec!(4)));
        assert_eq!(oracle.snapshot(1, 10), dec!(1));

        oracle.add(1, 10, dec!(2));
        assert_eq!(oracle.snapshot(1, 10), dec!(3));
    }
}
