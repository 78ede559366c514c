//! Fulfillment Router
//!
//! Pure decision per order line: hand the line back to standard procurement,
//! ship directly from each source, or consolidate at a hub first.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::{
    Allocation, FulfillmentPolicy, Order, OrderLine, SiteConfig, SkipReason, SkippedSource,
    Warehouse,
};
use crate::services::movement_builder::TransitMode;
use crate::services::source_selector::SourceSelector;
use crate::services::warehouses::WarehouseDirectory;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegateReason {
    NotTrackable,
    MultiWarehouseDisabled,
    NoSelectedSources,
}

impl DelegateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelegateReason::NotTrackable => "not_trackable",
            DelegateReason::MultiWarehouseDisabled => "multi_warehouse_disabled",
            DelegateReason::NoSelectedSources => "no_selected_sources",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RoutingOutcome {
    /// Standard single-warehouse procurement handles the line unmodified.
    Delegate { reason: DelegateReason },
    DirectShip { allocation: Allocation },
    CollectAtHub { allocation: Allocation, hub: Warehouse },
}

impl RoutingOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RoutingOutcome::Delegate { .. } => "delegate",
            RoutingOutcome::DirectShip { .. } => "direct_ship",
            RoutingOutcome::CollectAtHub { .. } => "collect_at_hub",
        }
    }

    pub fn allocation(&self) -> Option<&Allocation> {
        match self {
            RoutingOutcome::Delegate { .. } => None,
            RoutingOutcome::DirectShip { allocation }
            | RoutingOutcome::CollectAtHub { allocation, .. } => Some(allocation),
        }
    }
}

#[derive(Clone)]
pub struct FulfillmentRouter {
    directory: Arc<dyn WarehouseDirectory>,
    selector: SourceSelector,
    transit: TransitMode,
}

impl FulfillmentRouter {
    pub fn new(directory: Arc<dyn WarehouseDirectory>, selector: SourceSelector) -> Self {
        Self {
            directory,
            selector,
            transit: TransitMode::Direct,
        }
    }

    /// Sources must carry an internal transfer type when hub transfers pass
    /// through a transit location.
    pub fn with_transit(mut self, transit: TransitMode) -> Self {
        self.transit = transit;
        self
    }

    #[instrument(skip(self, order, line, site), fields(order_id = order.id, line_id = line.id))]
    pub async fn route(
        &self,
        order: &Order,
        line: &OrderLine,
        site: &SiteConfig,
    ) -> Result<RoutingOutcome, ServiceError> {
        if !line.product.is_trackable() {
            return Ok(delegate(DelegateReason::NotTrackable));
        }
        if !site.multi_warehouse_enabled {
            return Ok(delegate(DelegateReason::MultiWarehouseDisabled));
        }
        if line.selected_source_ids.is_empty() {
            return Ok(delegate(DelegateReason::NoSelectedSources));
        }

        line.validate()?;

        let policy = site.effective_policy(order);
        let hub = match policy {
            FulfillmentPolicy::DirectShip => None,
            FulfillmentPolicy::CollectAtHub => Some(self.resolve_hub(order, site).await?),
        };

        let mut skipped = Vec::new();
        let mut candidates = Vec::with_capacity(line.selected_source_ids.len());
        for &warehouse_id in &line.selected_source_ids {
            match self.directory.get(warehouse_id).await? {
                None => {
                    warn!(warehouse_id, "Selected source warehouse does not exist");
                    skipped.push(SkippedSource::new(warehouse_id, SkipReason::UnknownWarehouse));
                }
                Some(_) if !line.product.allows_source(warehouse_id) => {
                    warn!(
                        warehouse_id,
                        product_id = line.product.id,
                        "Product may not be sourced from this warehouse"
                    );
                    skipped.push(SkippedSource::new(
                        warehouse_id,
                        SkipReason::NotAllowedForProduct,
                    ));
                }
                Some(warehouse) => candidates.push(warehouse),
            }
        }

        let hub_id = hub.as_ref().map(|h| h.id);
        let needs_internal_type = matches!(self.transit, TransitMode::Via(_));
        let mut allocation = self
            .selector
            .allocate_with(line.product.id, line.quantity, &candidates, |w| match hub_id {
                None if w.out_type_id.is_none() => Some(SkipReason::MissingOutboundType),
                None => None,
                Some(hub_id) if w.id == hub_id => Some(SkipReason::IsHub),
                Some(_) if needs_internal_type && w.int_type_id.is_none() => {
                    Some(SkipReason::MissingInternalType)
                }
                Some(_) => None,
            })
            .await?;

        skipped.append(&mut allocation.skipped);
        allocation.skipped = skipped;

        let outcome = match hub {
            None => RoutingOutcome::DirectShip { allocation },
            Some(hub) => RoutingOutcome::CollectAtHub { allocation, hub },
        };

        info!(
            outcome = outcome.label(),
            shortfall = ?outcome.allocation().map(|a| a.shortfall),
            "Line routed"
        );

        Ok(outcome)
    }

    async fn resolve_hub(&self, order: &Order, site: &SiteConfig) -> Result<Warehouse, ServiceError> {
        let hub_id = site.hub_for(order).ok_or_else(|| {
            ServiceError::configuration(format!(
                "Order {} collects at a hub but site '{}' has no hub warehouse configured",
                order.name, site.name
            ))
        })?;

        self.directory.get(hub_id).await?.ok_or_else(|| {
            ServiceError::configuration(format!(
                "Hub warehouse {} configured for site '{}' does not exist",
                hub_id, site.name
            ))
        })
    }
}

fn delegate(reason: DelegateReason) -> RoutingOutcome {
    info!(reason = reason.as_str(), "Line delegated to standard procurement");
    RoutingOutcome::Delegate { reason }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Product, ProductKind};
    use crate::services::availability::InMemoryAvailability;
    use crate::services::source_selector::SelectorSettings;
    use crate::services::warehouses::InMemoryWarehouseDirectory;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn router(transit: TransitMode) -> FulfillmentRouter {
        let directory = InMemoryWarehouseDirectory::with_warehouses([
            Warehouse::new(1, "East", 1)
                .with_stock_location(10)
                .with_out_type(100)
                .with_int_type(101),
            Warehouse::new(2, "West", 1)
                .with_stock_location(20)
                .with_out_type(200),
            Warehouse::new(9, "DC", 1)
                .with_stock_location(90)
                .with_int_type(901)
                .as_distribution_center(),
        ]);
        let stock = InMemoryAvailability::new();
        stock.set(1, 10, dec!(4));
        stock.set(1, 20, dec!(4));
        stock.set(1, 90, dec!(100));
        let selector = SourceSelector::new(Arc::new(stock), SelectorSettings::default());
        FulfillmentRouter::new(Arc::new(directory), selector).with_transit(transit)
    }

    fn order(policy: FulfillmentPolicy) -> Order {
        Order {
            id: 1,
            name: "SO001".into(),
            company_id: 1,
            site_id: Some(1),
            policy: Some(policy),
            hub_warehouse_id: None,
            warehouse_id: 1,
            shipping_location_id: 500,
            procurement_group_id: Some(77),
        }
    }

    fn line(sources: &[i64]) -> OrderLine {
        OrderLine::new(1, 1, Product::storable(1, "Widget"), dec!(6)).with_sources(sources.to_vec())
    }

    fn site() -> SiteConfig {
        SiteConfig::new(1, "Shop").enabled().with_hub(9)
    }

    #[tokio::test]
    async fn delegates_non_trackable_products() {
        let mut line = line(&[1]);
        line.product = line.product.with_kind(ProductKind::Consumable);

        let outcome = router(TransitMode::Direct)
            .route(&order(FulfillmentPolicy::DirectShip), &line, &site())
            .await
            .unwrap();
        assert_eq!(outcome, RoutingOutcome::Delegate { reason: DelegateReason::NotTrackable });
    }

    #[tokio::test]
    async fn delegates_when_site_disabled_or_nothing_selected() {
        let router = router(TransitMode::Direct);
        let order = order(FulfillmentPolicy::DirectShip);

        let disabled = SiteConfig::new(1, "Shop").with_hub(9);
        assert_matches!(
            router.route(&order, &line(&[1]), &disabled).await.unwrap(),
            RoutingOutcome::Delegate { reason: DelegateReason::MultiWarehouseDisabled }
        );
        assert_matches!(
            router.route(&order, &line(&[]), &site()).await.unwrap(),
            RoutingOutcome::Delegate { reason: DelegateReason::NoSelectedSources }
        );
    }

    #[tokio::test]
    async fn direct_ship_skips_sources_without_outbound_type() {
        let outcome = router(TransitMode::Direct)
            .route(&order(FulfillmentPolicy::DirectShip), &line(&[1, 9]), &site())
            .await
            .unwrap();

        let allocation = assert_matches!(outcome, RoutingOutcome::DirectShip { allocation } => allocation);
        assert_eq!(allocation.quantity_for(1), dec!(4));
        assert_eq!(allocation.quantity_for(9), dec!(0));
        assert_eq!(allocation.shortfall, dec!(2));
        assert_eq!(
            allocation.skipped,
            vec![SkippedSource::new(9, SkipReason::MissingOutboundType)]
        );
    }

    #[tokio::test]
    async fn collect_at_hub_requires_a_hub() {
        let result = router(TransitMode::Direct)
            .route(
                &order(FulfillmentPolicy::CollectAtHub),
                &line(&[1, 2]),
                &SiteConfig::new(1, "Shop").enabled(),
            )
            .await;
        assert_matches!(result, Err(ServiceError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn collect_at_hub_never_sources_from_the_hub() {
        let outcome = router(TransitMode::Direct)
            .route(&order(FulfillmentPolicy::CollectAtHub), &line(&[1, 2, 9]), &site())
            .await
            .unwrap();

        let (allocation, hub) = assert_matches!(
            outcome,
            RoutingOutcome::CollectAtHub { allocation, hub } => (allocation, hub)
        );
        assert_eq!(hub.id, 9);
        assert_eq!(allocation.quantity_for(1), dec!(4));
        assert_eq!(allocation.quantity_for(2), dec!(2));
        assert_eq!(allocation.skipped, vec![SkippedSource::new(9, SkipReason::IsHub)]);
    }

    #[tokio::test]
    async fn transit_mode_requires_source_internal_type() {
        let outcome = router(TransitMode::Via(300))
            .route(&order(FulfillmentPolicy::CollectAtHub), &line(&[1, 2]), &site())
            .await
            .unwrap();

        let allocation = outcome.allocation().unwrap();
        assert_eq!(allocation.quantity_for(1), dec!(4));
        assert_eq!(allocation.shortfall, dec!(2));
        assert_eq!(
            allocation.skipped,
            vec![SkippedSource::new(2, SkipReason::MissingInternalType)]
        );
    }

    #[tokio::test]
    async fn unknown_and_disallowed_sources_are_reported() {
        let mut line = line(&[1, 2, 42]);
        line.product = line.product.with_allowed_sources([1, 42]);

        let outcome = router(TransitMode::Direct)
            .route(&order(FulfillmentPolicy::DirectShip), &line, &site())
            .await
            .unwrap();

        let allocation = outcome.allocation().unwrap();
        assert_eq!(
            allocation.skipped,
            vec![
                SkippedSource::new(2, SkipReason::NotAllowedForProduct),
                SkippedSource::new(42, SkipReason::UnknownWarehouse),
            ]
        );
    }

    #[tokio::test]
    async fn order_hub_overrides_site_hub() {
        let mut order = order(FulfillmentPolicy::CollectAtHub);
        order.hub_warehouse_id = Some(2);

        let outcome = router(TransitMode::Direct)
            .route(&order, &line(&[1]), &site())
            .await
            .unwrap();
        assert_matches!(outcome, RoutingOutcome::CollectAtHub { hub, .. } if hub.id == 2);
    }

    #[tokio::test]
    async fn site_default_policy_applies_without_order_policy() {
        let mut order = order(FulfillmentPolicy::CollectAtHub);
        order.policy = None;
        let site = site().with_policy(FulfillmentPolicy::DirectShip);

        let outcome = router(TransitMode::Direct)
            .route(&order, &line(&[1]), &site)
            .await
            .unwrap();
        assert_eq!(outcome.label(), "direct_ship");
    }
}
