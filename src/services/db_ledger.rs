use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::entities::{
    stock_move::{self, Entity as StockMoveEntity},
    stock_quant::{self, Entity as StockQuantEntity},
};
use crate::errors::ServiceError;
use crate::models::{LocationId, Movement, MovementSpec, MovementState, OrderLineId, ProductId};
use crate::services::movement_ledger::{
    check_specs, LedgerTransaction, MovementLedger, ReservationSummary,
};

/// Movement ledger persisted in `stock_moves`, reserving against `stock_quants`.
#[derive(Clone)]
pub struct DbMovementLedger {
    db: Arc<DatabaseConnection>,
}

impl DbMovementLedger {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn to_movements(models: Vec<stock_move::Model>) -> Result<Vec<Movement>, ServiceError> {
    models.into_iter().map(Movement::try_from).collect()
}

fn reservable_states() -> Vec<&'static str> {
    vec![
        MovementState::Confirmed.as_str(),
        MovementState::Waiting.as_str(),
    ]
}

#[async_trait]
impl MovementLedger for DbMovementLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        Ok(Box::new(DbLedgerTransaction { txn }))
    }

    #[instrument(skip(self))]
    async fn movements_for_line(
        &self,
        line_id: OrderLineId,
    ) -> Result<Vec<Movement>, ServiceError> {
        let models = StockMoveEntity::find()
            .filter(stock_move::Column::OrderLineId.eq(line_id))
            .order_by_asc(stock_move::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        to_movements(models)
    }

    async fn pending_reservations(&self) -> Result<Vec<Movement>, ServiceError> {
        let models = StockMoveEntity::find()
            .filter(stock_move::Column::State.is_in(reservable_states()))
            .order_by_asc(stock_move::Column::CreatedAt)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)?;
        to_movements(models)
    }

    #[instrument(skip(self))]
    async fn reserve_pending(&self) -> Result<ReservationSummary, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let pending = StockMoveEntity::find()
            .filter(stock_move::Column::State.is_in(reservable_states()))
            .order_by_asc(stock_move::Column::CreatedAt)
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        let mut summary = ReservationSummary::default();
        for model in pending {
            let updated = reserve_move(&txn, model).await?;
            if updated.state == MovementState::Assigned.as_str() {
                summary.assigned += 1;
            } else {
                summary.waiting += 1;
            }
        }

        txn.commit().await.map_err(ServiceError::db_error)?;
        debug!(assigned = summary.assigned, waiting = summary.waiting, "Reservation pass finished");
        Ok(summary)
    }

    #[instrument(skip(self))]
    async fn mark_done(&self, id: Uuid) -> Result<Movement, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let model = StockMoveEntity::find_by_id(id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Movement {} not found", id)))?;

        if model.state != MovementState::Assigned.as_str() {
            return Err(ServiceError::InvalidInput(format!(
                "Movement {} is {} and cannot be completed",
                id, model.state
            )));
        }

        consume_reserved(&txn, model.product_id, model.source_location_id, model.quantity).await?;
        receive_stock(&txn, model.product_id, model.destination_location_id, model.quantity)
            .await?;

        let mut active: stock_move::ActiveModel = model.into();
        active.state = Set(MovementState::Done.as_str().to_string());
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::db_error)?;
        info!(movement_id = %id, "Movement done");
        Movement::try_from(updated)
    }
}

struct DbLedgerTransaction {
    txn: DatabaseTransaction,
}

#[async_trait]
impl LedgerTransaction for DbLedgerTransaction {
    async fn submit(&mut self, specs: Vec<MovementSpec>) -> Result<Vec<Movement>, ServiceError> {
        check_specs(&specs)?;

        let now = Utc::now();
        let mut created = Vec::with_capacity(specs.len());
        for spec in specs {
            let movement = Movement::from_spec(spec, now);
            stock_move::ActiveModel::from(&movement)
                .insert(&self.txn)
                .await
                .map_err(ServiceError::db_error)?;
            created.push(movement);
        }
        Ok(created)
    }

    async fn confirm(&mut self, ids: &[Uuid]) -> Result<(), ServiceError> {
        if ids.is_empty() {
            return Ok(());
        }

        let result = StockMoveEntity::update_many()
            .col_expr(
                stock_move::Column::State,
                Expr::value(MovementState::Confirmed.as_str()),
            )
            .col_expr(stock_move::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(stock_move::Column::Id.is_in(ids.to_vec()))
            .filter(stock_move::Column::State.eq(MovementState::Draft.as_str()))
            .exec(&self.txn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected != ids.len() as u64 {
            return Err(ServiceError::ledger(format!(
                "Confirmed {} of {} draft movements",
                result.rows_affected,
                ids.len()
            )));
        }
        Ok(())
    }

    async fn try_reserve(&mut self, ids: &[Uuid]) -> Result<Vec<Movement>, ServiceError> {
        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            let model = StockMoveEntity::find_by_id(*id)
                .one(&self.txn)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| {
                    ServiceError::ledger(format!("Movement {} is not part of this batch", id))
                })?;

            let reservable = MovementState::from_str(&model.state)
                .map(|s| s.is_reservable())
                .unwrap_or(false);
            if !reservable {
                continue;
            }

            updated.push(Movement::try_from(reserve_move(&self.txn, model).await?)?);
        }
        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        self.txn.commit().await.map_err(ServiceError::db_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), ServiceError> {
        self.txn.rollback().await.map_err(ServiceError::db_error)
    }
}

/// Assigns the move if its predecessor is done and its source covers it.
async fn reserve_move<C: ConnectionTrait>(
    conn: &C,
    model: stock_move::Model,
) -> Result<stock_move::Model, ServiceError> {
    let blocked = match model.predecessor_id {
        Some(predecessor_id) => StockMoveEntity::find_by_id(predecessor_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?
            .map(|p| p.state != MovementState::Done.as_str())
            .unwrap_or(true),
        None => false,
    };

    let next = if !blocked
        && reserve_stock(conn, model.product_id, model.source_location_id, model.quantity).await?
    {
        MovementState::Assigned
    } else {
        MovementState::Waiting
    };

    let mut active: stock_move::ActiveModel = model.into();
    active.state = Set(next.as_str().to_string());
    active.updated_at = Set(Utc::now());
    active.update(conn).await.map_err(ServiceError::db_error)
}

async fn quants_at<C: ConnectionTrait>(
    conn: &C,
    product_id: ProductId,
    location_id: LocationId,
) -> Result<Vec<stock_quant::Model>, ServiceError> {
    StockQuantEntity::find()
        .filter(stock_quant::Column::ProductId.eq(product_id))
        .filter(stock_quant::Column::LocationId.eq(location_id))
        .order_by_asc(stock_quant::Column::UpdatedAt)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Reserves `quantity` across the location's quants, or nothing at all.
async fn reserve_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: ProductId,
    location_id: LocationId,
    quantity: Decimal,
) -> Result<bool, ServiceError> {
    let quants = quants_at(conn, product_id, location_id).await?;
    let unreserved: Decimal = quants
        .iter()
        .map(|q| q.unreserved().max(Decimal::ZERO))
        .sum();
    if unreserved < quantity {
        return Ok(false);
    }

    let mut need = quantity;
    for quant in quants {
        if need <= Decimal::ZERO {
            break;
        }
        let take = quant.unreserved().max(Decimal::ZERO).min(need);
        if take <= Decimal::ZERO {
            continue;
        }
        let reserved = quant.reserved_quantity + take;
        let mut active: stock_quant::ActiveModel = quant.into();
        active.reserved_quantity = Set(reserved);
        active.updated_at = Set(Utc::now());
        active.update(conn).await.map_err(ServiceError::db_error)?;
        need -= take;
    }
    Ok(true)
}

async fn consume_reserved<C: ConnectionTrait>(
    conn: &C,
    product_id: ProductId,
    location_id: LocationId,
    quantity: Decimal,
) -> Result<(), ServiceError> {
    let mut need = quantity;
    for quant in quants_at(conn, product_id, location_id).await? {
        if need <= Decimal::ZERO {
            break;
        }
        let take = quant.reserved_quantity.min(need);
        if take <= Decimal::ZERO {
            continue;
        }
        let (on_hand, reserved) = (quant.quantity - take, quant.reserved_quantity - take);
        let mut active: stock_quant::ActiveModel = quant.into();
        active.quantity = Set(on_hand);
        active.reserved_quantity = Set(reserved);
        active.updated_at = Set(Utc::now());
        active.update(conn).await.map_err(ServiceError::db_error)?;
        need -= take;
    }

    if need > Decimal::ZERO {
        return Err(ServiceError::InternalError(format!(
            "Location {} holds {} less reserved stock of product {} than its assigned movement",
            location_id, need, product_id
        )));
    }
    Ok(())
}

async fn receive_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: ProductId,
    location_id: LocationId,
    quantity: Decimal,
) -> Result<(), ServiceError> {
    match quants_at(conn, product_id, location_id).await?.into_iter().next() {
        Some(quant) => {
            let on_hand = quant.quantity + quantity;
            let mut active: stock_quant::ActiveModel = quant.into();
            active.quantity = Set(on_hand);
            active.updated_at = Set(Utc::now());
            active.update(conn).await.map_err(ServiceError::db_error)?;
        }
        None => {
            stock_quant::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_id: Set(product_id),
                location_id: Set(location_id),
                quantity: Set(quantity),
                reserved_quantity: Set(Decimal::ZERO),
                updated_at: Set(Utc::now()),
            }
            .insert(conn)
            .await
            .map_err(ServiceError::db_error)?;
        }
    }
    Ok(())
}
