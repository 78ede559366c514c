use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::errors::ServiceError;
use crate::services::movement_ledger::{MovementLedger, ReservationSummary};

/// Periodically turns confirmed and waiting movements into reservations.
#[derive(Clone)]
pub struct ReservationScheduler {
    ledger: Arc<dyn MovementLedger>,
}

impl ReservationScheduler {
    pub fn new(ledger: Arc<dyn MovementLedger>) -> Self {
        Self { ledger }
    }

    pub async fn run_once(&self) -> Result<ReservationSummary, ServiceError> {
        let summary = self.ledger.reserve_pending().await?;
        debug!(
            assigned = summary.assigned,
            waiting = summary.waiting,
            "Reservation pass complete"
        );
        Ok(summary)
    }

    /// Spawns the background loop. Failed passes are logged and retried on
    /// the next tick.
    pub fn start(ledger: Arc<dyn MovementLedger>, interval: Duration) -> JoinHandle<()> {
        let scheduler = Self::new(ledger);
        info!(interval_ms = interval.as_millis() as u64, "Starting reservation scheduler");

        tokio::spawn(async move {
            loop {
                if let Err(e) = scheduler.run_once().await {
                    error!("reservation scheduler error: {}", e);
                }
                sleep(interval).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MovementKind, MovementSpec, MovementState};
    use crate::services::availability::InMemoryAvailability;
    use crate::services::movement_ledger::InMemoryMovementLedger;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn transfer() -> MovementSpec {
        MovementSpec {
            id: Uuid::new_v4(),
            kind: MovementKind::InternalTransfer,
            product_id: 1,
            quantity: dec!(2),
            source_location_id: 10,
            destination_location_id: 90,
            order_id: 1,
            order_line_id: 1,
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

    async fn backordered_ledger(stock: &Arc<InMemoryAvailability>) -> Arc<InMemoryMovementLedger> {
        let ledger = Arc::new(InMemoryMovementLedger::new(Arc::clone(stock)));
        let mut txn = ledger.begin().await.unwrap();
        let created = txn.submit(vec![transfer()]).await.unwrap();
        let ids: Vec<Uuid> = created.iter().map(|m| m.id).collect();
        txn.confirm(&ids).await.unwrap();
        txn.try_reserve(&ids).await.unwrap();
        txn.commit().await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn run_once_assigns_restocked_movements() {
        let stock = Arc::new(InMemoryAvailability::new());
        let ledger = backordered_ledger(&stock).await;
        let scheduler = ReservationScheduler::new(ledger.clone());

        assert_eq!(scheduler.run_once().await.unwrap().waiting, 1);

        stock.set(1, 10, dec!(2));
        assert_eq!(scheduler.run_once().await.unwrap().assigned, 1);
        assert_eq!(ledger.all_movements().await[0].state, MovementState::Assigned);
    }

    #[tokio::test]
    async fn background_loop_picks_up_stock() {
        let stock = Arc::new(InMemoryAvailability::new());
        let ledger = backordered_ledger(&stock).await;
        stock.set(1, 10, dec!(5));

        let handle = ReservationScheduler::start(ledger.clone(), Duration::from_millis(10));

        let mut assigned = false;
        for _ in 0..50 {
            if ledger.pending_reservations().await.unwrap().is_empty() {
                assigned = true;
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert!(assigned);
        assert_eq!(stock.snapshot(1, 10), dec!(3));
    }
}
