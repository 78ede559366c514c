#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use stateset_sourcing::{
    events::EventSender,
    models::{FulfillmentPolicy, Order, OrderLine, Product, SiteConfig, Warehouse},
    services::{
        availability::InMemoryAvailability,
        fulfillment::{FulfillmentOptions, FulfillmentService, InMemoryLineGuard},
        fulfillment_router::FulfillmentRouter,
        movement_builder::{MovementBuilder, TransitMode},
        movement_ledger::InMemoryMovementLedger,
        procurement::{ProcurementRequest, RecordingProcurement, StandardProcurement},
        source_selector::{SelectorSettings, SourceSelector},
        warehouses::InMemoryWarehouseDirectory,
    },
    ServiceError,
};

pub const PRODUCT_ID: i64 = 7;
pub const HUB_ID: i64 = 9;
pub const CUSTOMER_LOCATION: i64 = 500;
pub const TRANSIT_LOCATION: i64 = 300;

/// In-memory wiring of the whole confirmation pipeline.
pub struct Harness {
    pub stock: Arc<InMemoryAvailability>,
    pub directory: Arc<InMemoryWarehouseDirectory>,
    pub ledger: Arc<InMemoryMovementLedger>,
    pub procurement: Arc<RecordingProcurement>,
    pub guard: Arc<InMemoryLineGuard>,
}

impl Harness {
    pub fn new(warehouses: impl IntoIterator<Item = Warehouse>) -> Self {
        let stock = Arc::new(InMemoryAvailability::new());
        Self {
            directory: Arc::new(InMemoryWarehouseDirectory::with_warehouses(warehouses)),
            ledger: Arc::new(InMemoryMovementLedger::new(Arc::clone(&stock))),
            procurement: Arc::new(RecordingProcurement::new()),
            guard: Arc::new(InMemoryLineGuard::new()),
            stock,
        }
    }

    /// East, West and the DC hub.
    pub fn standard() -> Self {
        Self::new([east(), west(), dc()])
    }

    pub fn stock(&self, location_id: i64, quantity: Decimal) -> &Self {
        self.stock.set(PRODUCT_ID, location_id, quantity);
        self
    }

    pub fn service(&self) -> FulfillmentService {
        self.service_with(SelectorSettings::default(), TransitMode::Direct, FulfillmentOptions::default())
    }

    pub fn service_with(
        &self,
        settings: SelectorSettings,
        transit: TransitMode,
        options: FulfillmentOptions,
    ) -> FulfillmentService {
        let selector = SourceSelector::new(self.stock.clone(), settings);
        let router = FulfillmentRouter::new(self.directory.clone(), selector).with_transit(transit);
        let builder = MovementBuilder::new(self.directory.clone(), self.ledger.clone(), transit);
        FulfillmentService::new(router, builder, self.procurement.clone(), self.guard.clone())
            .with_options(options)
    }

    pub fn service_with_events(&self, events: EventSender) -> FulfillmentService {
        self.service().with_events(events)
    }

    /// Same wiring, handing procurement to `procurement` instead of the recorder.
    pub fn service_procuring_via(
        &self,
        procurement: Arc<dyn StandardProcurement>,
    ) -> FulfillmentService {
        let settings = SelectorSettings::default();
        let selector = SourceSelector::new(self.stock.clone(), settings);
        let router = FulfillmentRouter::new(self.directory.clone(), selector);
        let builder =
            MovementBuilder::new(self.directory.clone(), self.ledger.clone(), TransitMode::Direct);
        FulfillmentService::new(router, builder, procurement, self.guard.clone())
    }
}

/// Rejects the first `failures` requests, then records like the recorder.
pub struct FlakyProcurement {
    remaining_failures: AtomicUsize,
    pub inner: RecordingProcurement,
}

impl FlakyProcurement {
    pub fn failing(failures: usize) -> Self {
        Self {
            remaining_failures: AtomicUsize::new(failures),
            inner: RecordingProcurement::new(),
        }
    }
}

#[async_trait]
impl StandardProcurement for FlakyProcurement {
    async fn procure(&self, request: ProcurementRequest) -> Result<(), ServiceError> {
        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ServiceError::InternalError("procurement unavailable".into()));
        }
        self.inner.procure(request).await
    }
}

pub fn east() -> Warehouse {
    Warehouse::new(1, "East", 1)
        .with_stock_location(10)
        .with_out_type(100)
        .with_int_type(101)
        .with_priority(1)
        .as_ecommerce_source()
}

pub fn west() -> Warehouse {
    Warehouse::new(2, "West", 1)
        .with_stock_location(20)
        .with_out_type(200)
        .with_int_type(201)
        .with_priority(2)
        .as_ecommerce_source()
}

pub fn dc() -> Warehouse {
    Warehouse::new(HUB_ID, "DC", 1)
        .with_stock_location(90)
        .with_out_type(900)
        .with_int_type(901)
        .as_distribution_center()
}

pub fn site() -> SiteConfig {
    SiteConfig::new(1, "Web").enabled().with_hub(HUB_ID)
}

pub fn order(policy: FulfillmentPolicy) -> Order {
    Order {
        id: 1,
        name: "SO001".into(),
        company_id: 1,
        site_id: Some(1),
        policy: Some(policy),
        hub_warehouse_id: None,
        warehouse_id: HUB_ID,
        shipping_location_id: CUSTOMER_LOCATION,
        procurement_group_id: Some(77),
    }
}

pub fn line(id: i64, quantity: Decimal, sources: &[i64]) -> OrderLine {
    OrderLine::new(id, 1, Product::storable(PRODUCT_ID, "Widget"), quantity)
        .with_sources(sources.to_vec())
}
