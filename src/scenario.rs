//! Self-contained sourcing runs over in-memory stock and warehouses.
//!
//! Used by the `simulate` command to replay an order confirmation against a
//! JSON description of the warehouse network.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::models::{LocationId, Movement, Order, OrderLine, ProductId, SiteConfig, Warehouse};
use crate::services::availability::InMemoryAvailability;
use crate::services::fulfillment::{
    FulfillmentOptions, FulfillmentService, InMemoryLineGuard, OrderFulfillmentReport,
};
use crate::services::fulfillment_router::FulfillmentRouter;
use crate::services::movement_builder::{MovementBuilder, TransitMode};
use crate::services::movement_ledger::InMemoryMovementLedger;
use crate::services::procurement::{ProcurementRequest, RecordingProcurement};
use crate::services::source_selector::{SelectorSettings, SourceSelector};
use crate::services::warehouses::InMemoryWarehouseDirectory;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: Decimal,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub warehouses: Vec<Warehouse>,
    #[serde(default)]
    pub stock: Vec<StockLevel>,
    pub site: SiteConfig,
    pub order: Order,
    pub lines: Vec<OrderLine>,
    /// Unset tuning falls back to the configured or built-in defaults.
    #[serde(default)]
    pub selector: Option<SelectorSettings>,
    #[serde(default)]
    pub transit: Option<TransitMode>,
    #[serde(default)]
    pub options: Option<FulfillmentOptions>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScenarioOutcome {
    pub report: OrderFulfillmentReport,
    pub movements: Vec<Movement>,
    pub procurement: Vec<ProcurementRequest>,
}

impl Scenario {
    pub fn from_json(raw: &str) -> Result<Self, ServiceError> {
        let scenario: Scenario = serde_json::from_str(raw)
            .map_err(|e| ServiceError::InvalidInput(format!("Invalid scenario: {}", e)))?;
        for warehouse in &scenario.warehouses {
            warehouse.validate()?;
        }
        Ok(scenario)
    }

    /// Fills tuning the scenario leaves open.
    pub fn with_defaults(
        mut self,
        selector: SelectorSettings,
        transit: TransitMode,
        options: FulfillmentOptions,
    ) -> Self {
        self.selector.get_or_insert(selector);
        self.transit.get_or_insert(transit);
        self.options.get_or_insert(options);
        self
    }

    /// Confirms the order once against fresh in-memory state.
    #[instrument(skip_all, fields(order_id = self.order.id))]
    pub async fn run(&self, events: Option<EventSender>) -> Result<ScenarioOutcome, ServiceError> {
        let stock = Arc::new(InMemoryAvailability::new());
        for level in &self.stock {
            stock.add(level.product_id, level.location_id, level.quantity);
        }

        let directory = Arc::new(InMemoryWarehouseDirectory::with_warehouses(
            self.warehouses.iter().cloned(),
        ));
        let ledger = Arc::new(InMemoryMovementLedger::new(Arc::clone(&stock)));
        let procurement = Arc::new(RecordingProcurement::new());

        let transit = self.transit.unwrap_or_default();
        let selector = SourceSelector::new(stock.clone(), self.selector.unwrap_or_default());
        let router = FulfillmentRouter::new(directory.clone(), selector).with_transit(transit);
        let builder = MovementBuilder::new(directory, ledger.clone(), transit);

        let mut service = FulfillmentService::new(
            router,
            builder,
            procurement.clone(),
            Arc::new(InMemoryLineGuard::new()),
        )
        .with_options(self.options.unwrap_or_default());
        if let Some(events) = events {
            service = service.with_events(events);
        }

        let report = service
            .confirm_order(&self.order, &self.lines, &self.site)
            .await?;
        info!(movements = report.movement_count(), "Scenario complete");

        Ok(ScenarioOutcome {
            report,
            movements: ledger.all_movements().await,
            procurement: procurement.requests().await,
        })
    }
}
