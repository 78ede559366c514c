use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use validator::{Validate, ValidationError};

use super::{
    CompanyId, LocationId, OrderId, OrderLineId, ProcurementGroupId, ProductId, SiteId,
    WarehouseId,
};
use crate::errors::ServiceError;

/// How an order's multi-warehouse lines reach the customer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentPolicy {
    /// Every source ships its share straight to the customer.
    DirectShip,
    /// Sources transfer their share to the hub, which ships once.
    CollectAtHub,
}

impl Default for FulfillmentPolicy {
    fn default() -> Self {
        FulfillmentPolicy::CollectAtHub
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    Storable,
    Consumable,
    Service,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub kind: ProductKind,
    /// Restricts which warehouses may source this product. Empty means any.
    #[serde(default)]
    pub allowed_source_warehouse_ids: BTreeSet<WarehouseId>,
}

impl Product {
    pub fn storable(id: ProductId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: ProductKind::Storable,
            allowed_source_warehouse_ids: BTreeSet::new(),
        }
    }

    pub fn with_kind(mut self, kind: ProductKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_allowed_sources(mut self, ids: impl IntoIterator<Item = WarehouseId>) -> Self {
        self.allowed_source_warehouse_ids = ids.into_iter().collect();
        self
    }

    /// Only storable products have stock levels the core can allocate against.
    pub fn is_trackable(&self) -> bool {
        self.kind == ProductKind::Storable
    }

    pub fn allows_source(&self, warehouse_id: WarehouseId) -> bool {
        self.allowed_source_warehouse_ids.is_empty()
            || self.allowed_source_warehouse_ids.contains(&warehouse_id)
    }
}

/// Sales order header fields relevant to sourcing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub name: String,
    pub company_id: CompanyId,
    pub site_id: Option<SiteId>,
    /// Falls back to the site default when unset.
    #[serde(default)]
    pub policy: Option<FulfillmentPolicy>,
    /// Overrides the site hub when set.
    #[serde(default)]
    pub hub_warehouse_id: Option<WarehouseId>,
    /// The warehouse standard procurement uses for this order.
    pub warehouse_id: WarehouseId,
    /// Customer destination location.
    pub shipping_location_id: LocationId,
    #[serde(default)]
    pub procurement_group_id: Option<ProcurementGroupId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub order_id: OrderId,
    pub product: Product,
    #[validate(custom = "validate_quantity")]
    pub quantity: Decimal,
    #[serde(default)]
    pub selected_source_ids: BTreeSet<WarehouseId>,
    #[serde(default = "default_propagate_cancel")]
    pub propagate_cancel: bool,
}

fn default_propagate_cancel() -> bool {
    true
}

fn validate_quantity(quantity: &Decimal) -> Result<(), ValidationError> {
    if quantity.is_sign_negative() && !quantity.is_zero() {
        let mut err = ValidationError::new("quantity");
        err.message = Some("Line quantity must not be negative".into());
        return Err(err);
    }
    Ok(())
}

impl OrderLine {
    pub fn new(id: OrderLineId, order_id: OrderId, product: Product, quantity: Decimal) -> Self {
        Self {
            id,
            order_id,
            product,
            quantity,
            selected_source_ids: BTreeSet::new(),
            propagate_cancel: true,
        }
    }

    pub fn with_sources(mut self, ids: impl IntoIterator<Item = WarehouseId>) -> Self {
        self.selected_source_ids = ids.into_iter().collect();
        self
    }
}

/// Parses warehouse ids submitted as text (e.g. from a storefront form).
///
/// Duplicates collapse; blank entries are ignored. The first token that is
/// not an integer fails the whole selection.
pub fn parse_source_selection<S: AsRef<str>>(
    raw: &[S],
) -> Result<BTreeSet<WarehouseId>, ServiceError> {
    let mut ids = BTreeSet::new();
    for token in raw {
        let token = token.as_ref().trim();
        if token.is_empty() {
            continue;
        }
        let id = token.parse::<WarehouseId>().map_err(|_| {
            ServiceError::ValidationError(format!(
                "Source warehouse id '{}' is not a valid identifier",
                token
            ))
        })?;
        ids.insert(id);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn negative_quantity_is_rejected() {
        let line = OrderLine::new(1, 1, Product::storable(1, "Widget"), dec!(-1));
        assert!(line.validate().is_err());

        let line = OrderLine::new(1, 1, Product::storable(1, "Widget"), dec!(0));
        assert!(line.validate().is_ok());
    }

    #[test]
    fn parses_form_selection() {
        let ids = parse_source_selection(&["3", " 1", "3", ""]).unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn rejects_non_numeric_selection() {
        let err = parse_source_selection(&["1", "north"]).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(ref m) if m.contains("north")));
    }

    #[test]
    fn product_source_restriction() {
        let open = Product::storable(1, "Widget");
        assert!(open.allows_source(42));

        let restricted = Product::storable(1, "Widget").with_allowed_sources([1, 2]);
        assert!(restricted.allows_source(2));
        assert!(!restricted.allows_source(3));
    }

    #[test]
    fn only_storable_products_are_trackable() {
        assert!(Product::storable(1, "Widget").is_trackable());
        assert!(!Product::storable(1, "Setup fee")
            .with_kind(ProductKind::Service)
            .is_trackable());
    }
}
