//! Movement Builder
//!
//! Turns a routing outcome into concrete movements and submits each line's
//! batch to the ledger as one unit of work.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{
    Allocation, LocationId, Movement, MovementKind, MovementSpec, OperationTypeId, Order,
    OrderLine, SkipReason, SkippedSource, Warehouse, WarehouseId, ALLOCATION_EPSILON,
};
use crate::services::fulfillment_router::RoutingOutcome;
use crate::services::movement_ledger::{LedgerTransaction, MovementLedger};
use crate::services::warehouses::WarehouseDirectory;

/// How stock travels from a source to the hub.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitMode {
    /// Straight into the hub's stock location.
    #[default]
    Direct,
    /// Through an inter-warehouse transit location, as two linked hops.
    Via(LocationId),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MovementPlan {
    pub movements: Vec<MovementSpec>,
    /// Sources whose share could not be turned into a movement.
    pub skipped: Vec<SkippedSource>,
}

impl MovementPlan {
    pub fn is_empty(&self) -> bool {
        self.movements.is_empty()
    }
}

/// Fields every movement of a line shares.
struct LineContext<'a> {
    order: &'a Order,
    line: &'a OrderLine,
}

impl LineContext<'_> {
    #[allow(clippy::too_many_arguments)]
    fn spec(
        &self,
        kind: MovementKind,
        quantity: rust_decimal::Decimal,
        from: LocationId,
        to: LocationId,
        governing: WarehouseId,
        source: WarehouseId,
        operation_type_id: OperationTypeId,
    ) -> MovementSpec {
        MovementSpec {
            id: Uuid::new_v4(),
            kind,
            product_id: self.line.product.id,
            quantity,
            source_location_id: from,
            destination_location_id: to,
            order_id: self.order.id,
            order_line_id: self.line.id,
            procurement_group_id: self.order.procurement_group_id,
            warehouse_id: governing,
            source_warehouse_id: source,
            operation_type_id,
            origin: self.order.name.clone(),
            propagate_cancel: self.line.propagate_cancel,
            predecessor_id: None,
            successor_id: None,
        }
    }
}

#[derive(Clone)]
pub struct MovementBuilder {
    directory: Arc<dyn WarehouseDirectory>,
    ledger: Arc<dyn MovementLedger>,
    transit: TransitMode,
}

impl MovementBuilder {
    pub fn new(
        directory: Arc<dyn WarehouseDirectory>,
        ledger: Arc<dyn MovementLedger>,
        transit: TransitMode,
    ) -> Self {
        Self {
            directory,
            ledger,
            transit,
        }
    }

    pub fn transit(&self) -> TransitMode {
        self.transit
    }

    #[instrument(skip_all, fields(order_id = order.id, line_id = line.id, outcome = outcome.label()))]
    pub async fn build(
        &self,
        order: &Order,
        line: &OrderLine,
        outcome: &RoutingOutcome,
    ) -> Result<MovementPlan, ServiceError> {
        let ctx = LineContext { order, line };
        match outcome {
            RoutingOutcome::Delegate { .. } => Ok(MovementPlan::default()),
            RoutingOutcome::DirectShip { allocation } => self.direct_ship(&ctx, allocation).await,
            RoutingOutcome::CollectAtHub { allocation, hub } => {
                self.collect_at_hub(&ctx, allocation, hub).await
            }
        }
    }

    async fn direct_ship(
        &self,
        ctx: &LineContext<'_>,
        allocation: &Allocation,
    ) -> Result<MovementPlan, ServiceError> {
        let mut plan = MovementPlan::default();

        for entry in allocation.entries.iter().filter(|e| e.quantity > ALLOCATION_EPSILON) {
            let Some(source) = self.source(entry.warehouse_id, &mut plan).await? else {
                continue;
            };
            let (Some(location_id), Some(out_type_id)) = (source.stock_location_id, source.out_type_id)
            else {
                let reason = if source.stock_location_id.is_none() {
                    SkipReason::MissingStockLocation
                } else {
                    SkipReason::MissingOutboundType
                };
                skip(&mut plan, source.id, reason);
                continue;
            };

            plan.movements.push(ctx.spec(
                MovementKind::Delivery,
                entry.quantity,
                location_id,
                ctx.order.shipping_location_id,
                source.id,
                source.id,
                out_type_id,
            ));
        }

        Ok(plan)
    }

    async fn collect_at_hub(
        &self,
        ctx: &LineContext<'_>,
        allocation: &Allocation,
        hub: &Warehouse,
    ) -> Result<MovementPlan, ServiceError> {
        let hub_location_id = hub.stock_location_id.ok_or_else(|| {
            ServiceError::configuration(format!(
                "Hub warehouse '{}' has no stock location",
                hub.name
            ))
        })?;
        let hub_int_type_id = hub.int_type_id.ok_or_else(|| {
            ServiceError::configuration(format!(
                "Hub warehouse '{}' has no internal transfer operation type",
                hub.name
            ))
        })?;

        let mut plan = MovementPlan::default();

        for entry in allocation.entries.iter().filter(|e| e.quantity > ALLOCATION_EPSILON) {
            let Some(source) = self.source(entry.warehouse_id, &mut plan).await? else {
                continue;
            };
            let Some(location_id) = source.stock_location_id else {
                skip(&mut plan, source.id, SkipReason::MissingStockLocation);
                continue;
            };

            match self.transit {
                TransitMode::Direct => plan.movements.push(ctx.spec(
                    MovementKind::InternalTransfer,
                    entry.quantity,
                    location_id,
                    hub_location_id,
                    hub.id,
                    source.id,
                    hub_int_type_id,
                )),
                TransitMode::Via(transit_location_id) => {
                    let Some(source_int_type_id) = source.int_type_id else {
                        skip(&mut plan, source.id, SkipReason::MissingInternalType);
                        continue;
                    };

                    let mut outbound = ctx.spec(
                        MovementKind::InternalTransfer,
                        entry.quantity,
                        location_id,
                        transit_location_id,
                        source.id,
                        source.id,
                        source_int_type_id,
                    );
                    let mut inbound = ctx.spec(
                        MovementKind::InternalTransfer,
                        entry.quantity,
                        transit_location_id,
                        hub_location_id,
                        hub.id,
                        source.id,
                        hub_int_type_id,
                    );
                    outbound.successor_id = Some(inbound.id);
                    inbound.predecessor_id = Some(outbound.id);

                    plan.movements.push(outbound);
                    plan.movements.push(inbound);
                }
            }
        }

        Ok(plan)
    }

    async fn source(
        &self,
        warehouse_id: WarehouseId,
        plan: &mut MovementPlan,
    ) -> Result<Option<Warehouse>, ServiceError> {
        let found = self.directory.get(warehouse_id).await?;
        if found.is_none() {
            skip(plan, warehouse_id, SkipReason::UnknownWarehouse);
        }
        Ok(found)
    }

    /// Submits, confirms and reserves the plan in one ledger unit of work.
    ///
    /// Any ledger failure discards the whole batch.
    #[instrument(skip_all, fields(movements = plan.movements.len()))]
    pub async fn submit(&self, plan: &MovementPlan) -> Result<Vec<Movement>, ServiceError> {
        if plan.is_empty() {
            return Ok(Vec::new());
        }

        let mut txn = self.ledger.begin().await.map_err(into_ledger_error)?;

        match run_batch(txn.as_mut(), plan.movements.clone()).await {
            Ok(movements) => {
                txn.commit().await.map_err(|e| {
                    error!(error = %e, "Ledger commit failed");
                    into_ledger_error(e)
                })?;
                info!(count = movements.len(), "Movements committed");
                Ok(movements)
            }
            Err(e) => {
                error!(error = %e, "Ledger rejected movement batch, rolling back");
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "Ledger rollback failed");
                }
                Err(into_ledger_error(e))
            }
        }
    }
}

fn skip(plan: &mut MovementPlan, warehouse_id: WarehouseId, reason: SkipReason) {
    warn!(warehouse_id, reason = reason.as_str(), "Skipping source share");
    plan.skipped.push(SkippedSource::new(warehouse_id, reason));
}

async fn run_batch(
    txn: &mut dyn LedgerTransaction,
    specs: Vec<MovementSpec>,
) -> Result<Vec<Movement>, ServiceError> {
    let created = txn.submit(specs).await?;
    let ids: Vec<Uuid> = created.iter().map(|m| m.id).collect();
    txn.confirm(&ids).await?;

    let reserved: HashMap<Uuid, Movement> = txn
        .try_reserve(&ids)
        .await?
        .into_iter()
        .map(|m| (m.id, m))
        .collect();

    Ok(created
        .into_iter()
        .map(|m| reserved.get(&m.id).cloned().unwrap_or(m))
        .collect())
}

fn into_ledger_error(err: ServiceError) -> ServiceError {
    match err {
        ServiceError::LedgerSubmissionError(_) => err,
        other => ServiceError::ledger(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AllocationEntry, MovementState, Product};
    use crate::services::availability::InMemoryAvailability;
    use crate::services::movement_ledger::{FailPoint, InMemoryMovementLedger};
    use crate::services::warehouses::InMemoryWarehouseDirectory;
    use assert_matches::assert_matches;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Fixture {
        stock: Arc<InMemoryAvailability>,
        ledger: Arc<InMemoryMovementLedger>,
        directory: Arc<InMemoryWarehouseDirectory>,
    }

    impl Fixture {
        fn new() -> Self {
            let stock = Arc::new(InMemoryAvailability::new());
            stock.set(1, 10, dec!(10));
            stock.set(1, 20, dec!(10));
            let directory = Arc::new(InMemoryWarehouseDirectory::with_warehouses([
                Warehouse::new(1, "East", 1)
                    .with_stock_location(10)
                    .with_out_type(100)
                    .with_int_type(101),
                Warehouse::new(2, "West", 1).with_stock_location(20),
                dc(),
            ]));
            Self {
                ledger: Arc::new(InMemoryMovementLedger::new(Arc::clone(&stock))),
                stock,
                directory,
            }
        }

        fn builder(&self, transit: TransitMode) -> MovementBuilder {
            MovementBuilder::new(self.directory.clone(), self.ledger.clone(), transit)
        }
    }

    fn order() -> Order {
        Order {
            id: 5,
            name: "SO005".into(),
            company_id: 1,
            site_id: Some(1),
            policy: None,
            hub_warehouse_id: None,
            warehouse_id: 1,
            shipping_location_id: 500,
            procurement_group_id: Some(55),
        }
    }

    fn line() -> OrderLine {
        OrderLine::new(51, 5, Product::storable(1, "Widget"), dec!(8))
    }

    fn allocation(entries: &[(i64, Decimal)]) -> Allocation {
        let mut allocation = Allocation::empty(1, dec!(8));
        allocation.entries = entries
            .iter()
            .map(|(id, q)| AllocationEntry { warehouse_id: *id, quantity: *q })
            .collect();
        allocation.shortfall = dec!(8) - allocation.allocated_total();
        allocation
    }

    fn dc() -> Warehouse {
        Warehouse::new(9, "DC", 1)
            .with_stock_location(90)
            .with_int_type(901)
            .as_distribution_center()
    }

    #[tokio::test]
    async fn direct_ship_emits_one_delivery_per_usable_source() {
        let fixture = Fixture::new();
        let outcome = RoutingOutcome::DirectShip {
            allocation: allocation(&[(1, dec!(5)), (2, dec!(3))]),
        };

        let plan = fixture
            .builder(TransitMode::Direct)
            .build(&order(), &line(), &outcome)
            .await
            .unwrap();

        assert_eq!(plan.movements.len(), 1);
        let delivery = &plan.movements[0];
        assert_eq!(delivery.kind, MovementKind::Delivery);
        assert_eq!(delivery.source_location_id, 10);
        assert_eq!(delivery.destination_location_id, 500);
        assert_eq!(delivery.operation_type_id, 100);
        assert_eq!(delivery.order_line_id, 51);
        assert_eq!(delivery.procurement_group_id, Some(55));
        assert_eq!(delivery.origin, "SO005");
        assert_eq!(plan.skipped, vec![SkippedSource::new(2, SkipReason::MissingOutboundType)]);
    }

    #[tokio::test]
    async fn hub_without_internal_type_is_fatal() {
        let fixture = Fixture::new();
        let mut hub = dc();
        hub.int_type_id = None;
        let outcome = RoutingOutcome::CollectAtHub {
            allocation: allocation(&[(1, dec!(5))]),
            hub,
        };

        let result = fixture
            .builder(TransitMode::Direct)
            .build(&order(), &line(), &outcome)
            .await;
        assert_matches!(result, Err(ServiceError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn hub_without_stock_location_is_fatal() {
        let fixture = Fixture::new();
        let mut hub = dc();
        hub.stock_location_id = None;
        let outcome = RoutingOutcome::CollectAtHub {
            allocation: allocation(&[(1, dec!(5)), (2, dec!(3))]),
            hub,
        };

        let result = fixture
            .builder(TransitMode::Direct)
            .build(&order(), &line(), &outcome)
            .await;
        assert_matches!(
            result,
            Err(ServiceError::ConfigurationError(ref m)) if m.contains("stock location")
        );
        assert!(fixture.ledger.all_movements().await.is_empty());
        assert_eq!(fixture.stock.snapshot(1, 10), dec!(10));
    }

    #[tokio::test]
    async fn collect_at_hub_transfers_into_hub_stock() {
        let fixture = Fixture::new();
        let outcome = RoutingOutcome::CollectAtHub {
            allocation: allocation(&[(1, dec!(5)), (2, dec!(3))]),
            hub: dc(),
        };

        let plan = fixture
            .builder(TransitMode::Direct)
            .build(&order(), &line(), &outcome)
            .await
            .unwrap();

        assert_eq!(plan.movements.len(), 2);
        for movement in &plan.movements {
            assert_eq!(movement.kind, MovementKind::InternalTransfer);
            assert_eq!(movement.destination_location_id, 90);
            assert_eq!(movement.operation_type_id, 901);
            assert_eq!(movement.warehouse_id, 9);
        }
        assert_eq!(plan.movements[1].source_warehouse_id, 2);
    }

    #[tokio::test]
    async fn transit_mode_links_two_hops() {
        let fixture = Fixture::new();
        let outcome = RoutingOutcome::CollectAtHub {
            allocation: allocation(&[(1, dec!(6))]),
            hub: dc(),
        };

        let plan = fixture
            .builder(TransitMode::Via(300))
            .build(&order(), &line(), &outcome)
            .await
            .unwrap();

        let [outbound, inbound] = plan.movements.as_slice() else {
            panic!("expected two hops, got {:?}", plan.movements);
        };
        assert_eq!((outbound.source_location_id, outbound.destination_location_id), (10, 300));
        assert_eq!((inbound.source_location_id, inbound.destination_location_id), (300, 90));
        assert_eq!(outbound.operation_type_id, 101);
        assert_eq!(inbound.operation_type_id, 901);
        assert_eq!(outbound.successor_id, Some(inbound.id));
        assert_eq!(inbound.predecessor_id, Some(outbound.id));
    }

    #[tokio::test]
    async fn submit_confirms_and_reserves() {
        let fixture = Fixture::new();
        let builder = fixture.builder(TransitMode::Via(300));
        let outcome = RoutingOutcome::CollectAtHub {
            allocation: allocation(&[(1, dec!(6))]),
            hub: dc(),
        };
        let plan = builder.build(&order(), &line(), &outcome).await.unwrap();

        let movements = builder.submit(&plan).await.unwrap();

        assert_eq!(movements[0].state, MovementState::Assigned);
        assert_eq!(movements[1].state, MovementState::Waiting);
        assert_eq!(fixture.stock.snapshot(1, 10), dec!(4));
        assert_eq!(fixture.ledger.movements_for_line(51).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn ledger_failure_rolls_back_whole_batch() {
        let fixture = Fixture::new();
        fixture.ledger.fail_at(Some(FailPoint::Reserve)).await;
        let builder = fixture.builder(TransitMode::Direct);
        let outcome = RoutingOutcome::CollectAtHub {
            allocation: allocation(&[(1, dec!(5)), (2, dec!(3))]),
            hub: dc(),
        };
        let plan = builder.build(&order(), &line(), &outcome).await.unwrap();

        let result = builder.submit(&plan).await;

        assert_matches!(result, Err(ServiceError::LedgerSubmissionError(_)));
        assert!(fixture.ledger.all_movements().await.is_empty());
        assert_eq!(fixture.ledger.rollback_count(), 1);
        assert_eq!(fixture.stock.snapshot(1, 10), dec!(10));
    }

    #[tokio::test]
    async fn empty_plan_submits_nothing() {
        let fixture = Fixture::new();
        fixture.ledger.fail_at(Some(FailPoint::Submit)).await;

        let movements = fixture
            .builder(TransitMode::Direct)
            .submit(&MovementPlan::default())
            .await
            .unwrap();
        assert!(movements.is_empty());
    }
}
