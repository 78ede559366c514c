//! Order confirmation orchestration.
//!
//! Each eligible line runs guard → router → builder → ledger → procurement
//! hand-off. A line is its own atomic unit: a fatal error stops the order at
//! that line, lines before it keep their committed movements. A line whose
//! movements committed but whose hand-off failed only retries the hand-off.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics;
use crate::models::{
    Order, OrderId, OrderLine, OrderLineId, ProductId, SiteConfig, SkippedSource, WarehouseId,
    QUANTITY_TOLERANCE,
};
use crate::services::fulfillment_router::{DelegateReason, FulfillmentRouter, RoutingOutcome};
use crate::services::movement_builder::MovementBuilder;
use crate::services::procurement::{ProcurementReason, ProcurementRequest, StandardProcurement};

/// How far a line got through sourcing.
#[derive(Clone, Debug, PartialEq)]
pub enum LineProgress {
    Fresh,
    /// Movements are committed; the shortfall hand-off has not gone through yet.
    ProcurementPending(ProcurementRequest),
    Processed,
}

/// Remembers which lines already produced movements.
#[async_trait]
pub trait ProcessedLineGuard: Send + Sync {
    async fn progress(&self, line_id: OrderLineId) -> Result<LineProgress, ServiceError>;

    async fn mark_procurement_pending(
        &self,
        request: ProcurementRequest,
    ) -> Result<(), ServiceError>;

    async fn mark_processed(&self, line_id: OrderLineId) -> Result<(), ServiceError>;

    async fn reset(&self, line_id: OrderLineId) -> Result<(), ServiceError>;

    async fn is_processed(&self, line_id: OrderLineId) -> Result<bool, ServiceError> {
        Ok(matches!(self.progress(line_id).await?, LineProgress::Processed))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLineGuard {
    lines: DashMap<OrderLineId, LineProgress>,
}

impl InMemoryLineGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessedLineGuard for InMemoryLineGuard {
    async fn progress(&self, line_id: OrderLineId) -> Result<LineProgress, ServiceError> {
        Ok(self
            .lines
            .get(&line_id)
            .map(|p| p.value().clone())
            .unwrap_or(LineProgress::Fresh))
    }

    async fn mark_procurement_pending(
        &self,
        request: ProcurementRequest,
    ) -> Result<(), ServiceError> {
        self.lines
            .insert(request.line_id, LineProgress::ProcurementPending(request));
        Ok(())
    }

    async fn mark_processed(&self, line_id: OrderLineId) -> Result<(), ServiceError> {
        self.lines.insert(line_id, LineProgress::Processed);
        Ok(())
    }

    async fn reset(&self, line_id: OrderLineId) -> Result<(), ServiceError> {
        self.lines.remove(&line_id);
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentOptions {
    /// Hand uncovered direct-ship quantity to standard procurement.
    #[serde(default)]
    pub delegate_direct_shortfall: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum LineResolution {
    AlreadyProcessed,
    /// Only the pending shortfall hand-off was sent again.
    ProcurementResumed,
    Delegated { reason: DelegateReason },
    DirectShip,
    CollectAtHub { hub_warehouse_id: WarehouseId },
}

/// What happened to one line; the durable evidence for operator review.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LineReport {
    pub line_id: OrderLineId,
    pub product_id: ProductId,
    pub requested: Decimal,
    pub resolution: LineResolution,
    pub allocated: Decimal,
    pub shortfall: Decimal,
    pub skipped: Vec<SkippedSource>,
    pub movement_ids: Vec<Uuid>,
    pub procurement: Option<ProcurementRequest>,
}

impl LineReport {
    fn untouched(line: &OrderLine, resolution: LineResolution) -> Self {
        Self {
            line_id: line.id,
            product_id: line.product.id,
            requested: line.quantity,
            resolution,
            allocated: Decimal::ZERO,
            shortfall: Decimal::ZERO,
            skipped: Vec::new(),
            movement_ids: Vec::new(),
            procurement: None,
        }
    }

    pub fn has_shortfall(&self) -> bool {
        self.shortfall > QUANTITY_TOLERANCE
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrderFulfillmentReport {
    pub order_id: OrderId,
    pub lines: Vec<LineReport>,
}

impl OrderFulfillmentReport {
    pub fn line(&self, line_id: OrderLineId) -> Option<&LineReport> {
        self.lines.iter().find(|l| l.line_id == line_id)
    }

    pub fn movement_count(&self) -> usize {
        self.lines.iter().map(|l| l.movement_ids.len()).sum()
    }

    pub fn total_shortfall(&self) -> Decimal {
        self.lines.iter().map(|l| l.shortfall).sum()
    }
}

pub struct FulfillmentService {
    router: FulfillmentRouter,
    builder: MovementBuilder,
    procurement: Arc<dyn StandardProcurement>,
    guard: Arc<dyn ProcessedLineGuard>,
    events: Option<EventSender>,
    options: FulfillmentOptions,
}

impl FulfillmentService {
    pub fn new(
        router: FulfillmentRouter,
        builder: MovementBuilder,
        procurement: Arc<dyn StandardProcurement>,
        guard: Arc<dyn ProcessedLineGuard>,
    ) -> Self {
        Self {
            router,
            builder,
            procurement,
            guard,
            events: None,
            options: FulfillmentOptions::default(),
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_options(mut self, options: FulfillmentOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolves every line of a confirmed order.
    #[instrument(skip_all, fields(order_id = order.id, lines = lines.len()))]
    pub async fn confirm_order(
        &self,
        order: &Order,
        lines: &[OrderLine],
        site: &SiteConfig,
    ) -> Result<OrderFulfillmentReport, ServiceError> {
        let mut report = OrderFulfillmentReport {
            order_id: order.id,
            lines: Vec::with_capacity(lines.len()),
        };

        for line in lines {
            let started = Instant::now();
            match self.resolve_line(order, line, site).await {
                Ok(line_report) => report.lines.push(line_report),
                Err(e) => {
                    if matches!(e, ServiceError::LedgerSubmissionError(_)) {
                        metrics::record_ledger_failure();
                    }
                    metrics::record_line_failure(e.code());
                    error!(
                        line_id = line.id,
                        code = e.code(),
                        error = %e,
                        "Order line could not be fulfilled"
                    );
                    self.emit(Event::FulfillmentFailed {
                        order_id: order.id,
                        line_id: line.id,
                        code: e.code().to_string(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    return Err(e);
                }
            }
            metrics::observe_line_duration(started.elapsed().as_secs_f64());
        }

        info!(
            movements = report.movement_count(),
            shortfall = %report.total_shortfall(),
            "Order fulfillment resolved"
        );
        Ok(report)
    }

    /// Lets a line be routed again on the next confirmation.
    pub async fn reset_line(&self, line_id: OrderLineId) -> Result<(), ServiceError> {
        self.guard.reset(line_id).await
    }

    async fn resolve_line(
        &self,
        order: &Order,
        line: &OrderLine,
        site: &SiteConfig,
    ) -> Result<LineReport, ServiceError> {
        match self.guard.progress(line.id).await? {
            LineProgress::Fresh => {}
            LineProgress::Processed => {
                info!(line_id = line.id, "Line already processed, skipping");
                return Ok(LineReport::untouched(line, LineResolution::AlreadyProcessed));
            }
            LineProgress::ProcurementPending(request) => {
                info!(
                    line_id = line.id,
                    quantity = %request.quantity,
                    "Resuming pending procurement hand-off"
                );
                self.procurement.procure(request.clone()).await?;
                self.guard.mark_processed(line.id).await?;
                let mut report = LineReport::untouched(line, LineResolution::ProcurementResumed);
                report.shortfall = request.quantity;
                report.procurement = Some(request);
                return Ok(report);
            }
        }

        let outcome = self.router.route(order, line, site).await?;
        metrics::record_line_routed(outcome.label());
        self.emit(Event::LineRouted {
            order_id: order.id,
            line_id: line.id,
            outcome: outcome.label().to_string(),
        });

        let (allocation, resolution) = match &outcome {
            RoutingOutcome::Delegate { reason } => {
                let mut report =
                    LineReport::untouched(line, LineResolution::Delegated { reason: *reason });
                if line.quantity > QUANTITY_TOLERANCE {
                    let request = self.request(
                        order,
                        line,
                        line.quantity,
                        order.warehouse_id,
                        ProcurementReason::Delegated,
                    );
                    self.procurement.procure(request.clone()).await?;
                    report.procurement = Some(request);
                }
                return Ok(report);
            }
            RoutingOutcome::DirectShip { allocation } => (allocation, LineResolution::DirectShip),
            RoutingOutcome::CollectAtHub { allocation, hub } => (
                allocation,
                LineResolution::CollectAtHub {
                    hub_warehouse_id: hub.id,
                },
            ),
        };

        let plan = self.builder.build(order, line, &outcome).await?;
        let movements = self.builder.submit(&plan).await?;

        // Shares the builder could not turn into movements fall back into the shortfall.
        let unmoved: Decimal = plan
            .skipped
            .iter()
            .map(|s| allocation.quantity_for(s.warehouse_id))
            .sum();
        let allocated = allocation.allocated_total() - unmoved;
        let shortfall = line.quantity - allocated;

        let mut skipped = allocation.skipped.clone();
        skipped.extend(plan.skipped.iter().cloned());

        metrics::record_movements(&movements);
        metrics::record_skipped(&skipped);

        let mut report = LineReport {
            line_id: line.id,
            product_id: line.product.id,
            requested: line.quantity,
            resolution,
            allocated,
            shortfall,
            skipped,
            movement_ids: movements.iter().map(|m| m.id).collect(),
            procurement: None,
        };

        let mut pending = None;
        if report.has_shortfall() {
            let target = match &outcome {
                RoutingOutcome::CollectAtHub { hub, .. } => {
                    Some((hub.id, ProcurementReason::HubShortfall))
                }
                RoutingOutcome::DirectShip { .. } if self.options.delegate_direct_shortfall => {
                    Some((order.warehouse_id, ProcurementReason::DirectShortfall))
                }
                _ => None,
            };
            pending = target.map(|(warehouse_id, reason)| {
                self.request(order, line, shortfall, warehouse_id, reason)
            });
        }

        // The movements are committed; record the hand-off before attempting it.
        match &pending {
            Some(request) => self.guard.mark_procurement_pending(request.clone()).await?,
            None => self.guard.mark_processed(line.id).await?,
        }

        if !report.movement_ids.is_empty() {
            self.emit(Event::MovementsCreated {
                order_id: order.id,
                line_id: line.id,
                movement_ids: report.movement_ids.clone(),
            });
        }
        for source in &report.skipped {
            self.emit(Event::SourceSkipped {
                line_id: line.id,
                warehouse_id: source.warehouse_id,
                reason: source.reason.clone(),
            });
        }

        if report.has_shortfall() {
            metrics::record_shortfall();
            warn!(line_id = line.id, shortfall = %shortfall, "Sources could not cover the line");
            self.emit(Event::ShortfallRecorded {
                order_id: order.id,
                line_id: line.id,
                product_id: line.product.id,
                requested: line.quantity,
                shortfall,
            });
        }

        if let Some(request) = pending {
            self.procurement.procure(request.clone()).await?;
            self.guard.mark_processed(line.id).await?;
            report.procurement = Some(request);
        }

        Ok(report)
    }

    fn request(
        &self,
        order: &Order,
        line: &OrderLine,
        quantity: Decimal,
        warehouse_id: WarehouseId,
        reason: ProcurementReason,
    ) -> ProcurementRequest {
        ProcurementRequest {
            order_id: order.id,
            line_id: line.id,
            product_id: line.product.id,
            quantity,
            warehouse_id,
            procurement_group_id: order.procurement_group_id,
            reason,
        }
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            if let Err(e) = events.try_send(event) {
                warn!(error = %e, "Dropping fulfillment event");
            }
        }
    }
}
