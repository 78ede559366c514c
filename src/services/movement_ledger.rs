//! Movement Ledger port
//!
//! The ledger durably records movements and owns their state transitions.
//! Writes happen inside a [`LedgerTransaction`] so that a line's batch is
//! accepted or discarded as a whole.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{LocationId, Movement, MovementSpec, MovementState, OrderLineId, ProductId};
use crate::services::availability::InMemoryAvailability;

/// Counts from one reservation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReservationSummary {
    pub assigned: usize,
    pub waiting: usize,
}

impl ReservationSummary {
    fn record(&mut self, state: MovementState) {
        match state {
            MovementState::Assigned => self.assigned += 1,
            MovementState::Waiting => self.waiting += 1,
            _ => {}
        }
    }
}

#[async_trait]
pub trait MovementLedger: Send + Sync {
    /// Opens a unit of work. Nothing it writes is visible before `commit`.
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, ServiceError>;

    async fn movements_for_line(&self, line_id: OrderLineId)
        -> Result<Vec<Movement>, ServiceError>;

    /// Movements still waiting for stock or for a predecessor.
    async fn pending_reservations(&self) -> Result<Vec<Movement>, ServiceError>;

    /// One reservation pass over every pending movement.
    async fn reserve_pending(&self) -> Result<ReservationSummary, ServiceError>;

    /// Completes an assigned movement, moving its stock to the destination.
    async fn mark_done(&self, id: Uuid) -> Result<Movement, ServiceError>;
}

#[async_trait]
pub trait LedgerTransaction: Send {
    async fn submit(&mut self, specs: Vec<MovementSpec>) -> Result<Vec<Movement>, ServiceError>;

    async fn confirm(&mut self, ids: &[Uuid]) -> Result<(), ServiceError>;

    /// Reserves what can be reserved; the rest is left waiting.
    async fn try_reserve(&mut self, ids: &[Uuid]) -> Result<Vec<Movement>, ServiceError>;

    async fn commit(self: Box<Self>) -> Result<(), ServiceError>;

    async fn rollback(self: Box<Self>) -> Result<(), ServiceError>;
}

/// Validates a batch before any of it is written.
pub(crate) fn check_specs(specs: &[MovementSpec]) -> Result<(), ServiceError> {
    let mut seen = std::collections::HashSet::with_capacity(specs.len());
    for spec in specs {
        if spec.quantity <= Decimal::ZERO {
            return Err(ServiceError::ledger(format!(
                "Movement {} has non-positive quantity {}",
                spec.id, spec.quantity
            )));
        }
        if spec.source_location_id == spec.destination_location_id {
            return Err(ServiceError::ledger(format!(
                "Movement {} has identical source and destination location {}",
                spec.id, spec.source_location_id
            )));
        }
        if !seen.insert(spec.id) {
            return Err(ServiceError::ledger(format!(
                "Movement {} submitted twice",
                spec.id
            )));
        }
    }
    Ok(())
}

/// Stage at which the in-memory ledger is told to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailPoint {
    Submit,
    Confirm,
    Reserve,
    Commit,
}

/// Ledger kept in process memory, reserving against an [`InMemoryAvailability`].
pub struct InMemoryMovementLedger {
    stock: Arc<InMemoryAvailability>,
    movements: Arc<RwLock<Vec<Movement>>>,
    fail_point: RwLock<Option<FailPoint>>,
    rollbacks: Arc<AtomicUsize>,
}

impl InMemoryMovementLedger {
    pub fn new(stock: Arc<InMemoryAvailability>) -> Self {
        Self {
            stock,
            movements: Arc::new(RwLock::new(Vec::new())),
            fail_point: RwLock::new(None),
            rollbacks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Makes every following unit of work fail at `point`.
    pub async fn fail_at(&self, point: Option<FailPoint>) {
        *self.fail_point.write().await = point;
    }

    pub async fn all_movements(&self) -> Vec<Movement> {
        self.movements.read().await.clone()
    }

    pub fn rollback_count(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MovementLedger for InMemoryMovementLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, ServiceError> {
        Ok(Box::new(InMemoryLedgerTransaction {
            stock: Arc::clone(&self.stock),
            movements: Arc::clone(&self.movements),
            rollbacks: Arc::clone(&self.rollbacks),
            fail_point: *self.fail_point.read().await,
            staged: Vec::new(),
            reservations: Vec::new(),
        }))
    }

    async fn movements_for_line(
        &self,
        line_id: OrderLineId,
    ) -> Result<Vec<Movement>, ServiceError> {
        Ok(self
            .movements
            .read()
            .await
            .iter()
            .filter(|m| m.order_line_id == line_id)
            .cloned()
            .collect())
    }

    async fn pending_reservations(&self) -> Result<Vec<Movement>, ServiceError> {
        Ok(self
            .movements
            .read()
            .await
            .iter()
            .filter(|m| m.state.is_reservable())
            .cloned()
            .collect())
    }

    #[instrument(skip(self))]
    async fn reserve_pending(&self) -> Result<ReservationSummary, ServiceError> {
        let mut movements = self.movements.write().await;
        let states: HashMap<Uuid, MovementState> =
            movements.iter().map(|m| (m.id, m.state)).collect();
        let mut summary = ReservationSummary::default();

        for movement in movements.iter_mut().filter(|m| m.state.is_reservable()) {
            let blocked = movement
                .predecessor_id
                .map(|p| states.get(&p) != Some(&MovementState::Done))
                .unwrap_or(false);

            let next = if !blocked
                && self.stock.reserve(
                    movement.product_id,
                    movement.source_location_id,
                    movement.quantity,
                ) {
                MovementState::Assigned
            } else {
                MovementState::Waiting
            };

            if next != movement.state {
                movement.state = next;
                movement.updated_at = Utc::now();
            }
            summary.record(next);
        }

        debug!(assigned = summary.assigned, waiting = summary.waiting, "Reservation pass finished");
        Ok(summary)
    }

    async fn mark_done(&self, id: Uuid) -> Result<Movement, ServiceError> {
        let mut movements = self.movements.write().await;
        let movement = movements
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| ServiceError::NotFound(format!("Movement {} not found", id)))?;

        if movement.state != MovementState::Assigned {
            return Err(ServiceError::InvalidInput(format!(
                "Movement {} is {} and cannot be completed",
                id,
                movement.state.as_str()
            )));
        }

        movement.state = MovementState::Done;
        movement.updated_at = Utc::now();
        self.stock.add(
            movement.product_id,
            movement.destination_location_id,
            movement.quantity,
        );

        info!(movement_id = %id, "Movement done");
        Ok(movement.clone())
    }
}

struct InMemoryLedgerTransaction {
    stock: Arc<InMemoryAvailability>,
    movements: Arc<RwLock<Vec<Movement>>>,
    rollbacks: Arc<AtomicUsize>,
    fail_point: Option<FailPoint>,
    staged: Vec<Movement>,
    reservations: Vec<(Uuid, ProductId, LocationId, Decimal)>,
}

impl InMemoryLedgerTransaction {
    fn check(&self, point: FailPoint) -> Result<(), ServiceError> {
        if self.fail_point == Some(point) {
            return Err(ServiceError::ledger(format!(
                "Ledger rejected the batch at {:?}",
                point
            )));
        }
        Ok(())
    }

    fn staged_mut(&mut self, id: Uuid) -> Result<&mut Movement, ServiceError> {
        self.staged
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| ServiceError::ledger(format!("Movement {} is not part of this batch", id)))
    }

    /// Unreserved stock left after the reservations already staged here.
    fn staged_available(&self, product_id: ProductId, location_id: LocationId) -> Decimal {
        let held: Decimal = self
            .reservations
            .iter()
            .filter(|(_, p, l, _)| *p == product_id && *l == location_id)
            .map(|(_, _, _, q)| *q)
            .sum();
        self.stock.snapshot(product_id, location_id) - held
    }

    async fn predecessor_done(&self, predecessor: Option<Uuid>) -> bool {
        let Some(id) = predecessor else {
            return true;
        };
        if let Some(staged) = self.staged.iter().find(|m| m.id == id) {
            return staged.state == MovementState::Done;
        }
        self.movements
            .read()
            .await
            .iter()
            .any(|m| m.id == id && m.state == MovementState::Done)
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryLedgerTransaction {
    async fn submit(&mut self, specs: Vec<MovementSpec>) -> Result<Vec<Movement>, ServiceError> {
        self.check(FailPoint::Submit)?;
        check_specs(&specs)?;

        let now = Utc::now();
        let created: Vec<Movement> = specs
            .into_iter()
            .map(|spec| Movement::from_spec(spec, now))
            .collect();
        self.staged.extend(created.iter().cloned());
        Ok(created)
    }

    async fn confirm(&mut self, ids: &[Uuid]) -> Result<(), ServiceError> {
        self.check(FailPoint::Confirm)?;
        for id in ids {
            let movement = self.staged_mut(*id)?;
            if movement.state != MovementState::Draft {
                return Err(ServiceError::ledger(format!(
                    "Movement {} is already {}",
                    id,
                    movement.state.as_str()
                )));
            }
            movement.state = MovementState::Confirmed;
        }
        Ok(())
    }

    async fn try_reserve(&mut self, ids: &[Uuid]) -> Result<Vec<Movement>, ServiceError> {
        self.check(FailPoint::Reserve)?;
        let mut updated = Vec::with_capacity(ids.len());

        for id in ids {
            let (predecessor, product_id, location_id, quantity, state) = {
                let m = self.staged_mut(*id)?;
                (m.predecessor_id, m.product_id, m.source_location_id, m.quantity, m.state)
            };
            if !state.is_reservable() {
                continue;
            }

            let next = if self.predecessor_done(predecessor).await
                && self.staged_available(product_id, location_id) >= quantity
            {
                self.reservations.push((*id, product_id, location_id, quantity));
                MovementState::Assigned
            } else {
                MovementState::Waiting
            };

            let movement = self.staged_mut(*id)?;
            movement.state = next;
            updated.push(movement.clone());
        }

        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> Result<(), ServiceError> {
        if let Err(e) = self.check(FailPoint::Commit) {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(e);
        }

        let mut staged = self.staged;
        for (id, product_id, location_id, quantity) in &self.reservations {
            if !self.stock.reserve(*product_id, *location_id, *quantity) {
                // Consumed concurrently since try_reserve; backorder instead.
                warn!(movement_id = %id, "Reservation lost before commit");
                if let Some(m) = staged.iter_mut().find(|m| m.id == *id) {
                    m.state = MovementState::Waiting;
                }
            }
        }

        let count = staged.len();
        self.movements.write().await.extend(staged);
        debug!(count, "Ledger batch committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), ServiceError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        debug!(discarded = self.staged.len(), "Ledger batch rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MovementKind;
    use rust_decimal_macros::dec;

    fn spec(quantity: Decimal, from: LocationId, to: LocationId) -> MovementSpec {
        MovementSpec {
            id: Uuid::new_v4(),
            kind: MovementKind::InternalTransfer,
            product_id: 1,
            quantity,
            source_location_id: from,
            destination_location_id: to,
            order_id: 1,
            order_line_id: 11,
            procurement_group_id: None,
            warehouse_id: 9,
            source_warehouse_id: 1,
            operation_type_id: 901,
            origin: "SO001".into(),
            propagate_cancel: true,
            predecessor_id: None,
            successor_id: None,
        }
    }

    async fn run_batch(
        ledger: &InMemoryMovementLedger,
        specs: Vec<MovementSpec>,
    ) -> Result<Vec<Movement>, ServiceError> {
        let mut txn = ledger.begin().await?;
        let created = txn.submit(specs).await?;
        let ids: Vec<Uuid> = created.iter().map(|m| m.id).collect();
        txn.confirm(&ids).await?;
        let reserved = txn.try_reserve(&ids).await?;
        txn.commit().await?;
        Ok(reserved)
    }

    #[tokio::test]
    async fn reserves_covered_movements() {
        let stock = Arc::new(InMemoryAvailability::new());
        stock.set(1, 10, dec!(5));
        let ledger = InMemoryMovementLedger::new(Arc::clone(&stock));

        let reserved = run_batch(&ledger, vec![spec(dec!(3), 10, 90), spec(dec!(3), 10, 90)])
            .await
            .unwrap();

        assert_eq!(reserved[0].state, MovementState::Assigned);
        assert_eq!(reserved[1].state, MovementState::Waiting);
        assert_eq!(stock.snapshot(1, 10), dec!(2));
        assert_eq!(ledger.pending_reservations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn nothing_is_visible_before_commit() {
        let stock = Arc::new(InMemoryAvailability::new());
        stock.set(1, 10, dec!(5));
        let ledger = InMemoryMovementLedger::new(Arc::clone(&stock));

        let mut txn = ledger.begin().await.unwrap();
        let created = txn.submit(vec![spec(dec!(2), 10, 90)]).await.unwrap();
        let ids: Vec<Uuid> = created.iter().map(|m| m.id).collect();
        txn.confirm(&ids).await.unwrap();
        txn.try_reserve(&ids).await.unwrap();

        assert!(ledger.movements_for_line(11).await.unwrap().is_empty());
        assert_eq!(stock.snapshot(1, 10), dec!(5));

        txn.rollback().await.unwrap();
        assert!(ledger.all_movements().await.is_empty());
        assert_eq!(ledger.rollback_count(), 1);
    }

    #[tokio::test]
    async fn fail_point_rejects_batch() {
        let ledger = InMemoryMovementLedger::new(Arc::new(InMemoryAvailability::new()));
        ledger.fail_at(Some(FailPoint::Confirm)).await;

        let result = run_batch(&ledger, vec![spec(dec!(1), 10, 90)]).await;
        assert!(matches!(result, Err(ServiceError::LedgerSubmissionError(_))));
    }

    #[tokio::test]
    async fn rejects_non_positive_quantities() {
        let ledger = InMemoryMovementLedger::new(Arc::new(InMemoryAvailability::new()));
        let result = run_batch(&ledger, vec![spec(dec!(0), 10, 90)]).await;
        assert!(matches!(result, Err(ServiceError::LedgerSubmissionError(_))));
    }

    #[tokio::test]
    async fn successor_waits_for_predecessor() {
        let stock = Arc::new(InMemoryAvailability::new());
        stock.set(1, 10, dec!(4));
        let ledger = InMemoryMovementLedger::new(Arc::clone(&stock));

        let mut first = spec(dec!(4), 10, 50);
        let mut second = spec(dec!(4), 50, 90);
        first.successor_id = Some(second.id);
        second.predecessor_id = Some(first.id);
        let (first_id, second_id) = (first.id, second.id);

        let reserved = run_batch(&ledger, vec![first, second]).await.unwrap();
        assert_eq!(reserved[0].state, MovementState::Assigned);
        assert_eq!(reserved[1].state, MovementState::Waiting);

        let summary = ledger.reserve_pending().await.unwrap();
        assert_eq!(summary, ReservationSummary { assigned: 0, waiting: 1 });

        ledger.mark_done(first_id).await.unwrap();
        assert_eq!(stock.snapshot(1, 50), dec!(4));

        let summary = ledger.reserve_pending().await.unwrap();
        assert_eq!(summary.assigned, 1);
        let second = ledger
            .all_movements()
            .await
            .into_iter()
            .find(|m| m.id == second_id)
            .unwrap();
        assert_eq!(second.state, MovementState::Assigned);
    }

    #[tokio::test]
    async fn only_assigned_movements_complete() {
        let ledger = InMemoryMovementLedger::new(Arc::new(InMemoryAvailability::new()));
        let created = run_batch(&ledger, vec![spec(dec!(1), 10, 90)]).await.unwrap();

        let result = ledger.mark_done(created[0].id).await;
        assert!(matches!(result, Err(ServiceError::InvalidInput(_))));
        assert!(matches!(
            ledger.mark_done(Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
