use serde::{Deserialize, Serialize};

use super::order::{FulfillmentPolicy, Order};
use super::{SiteId, WarehouseId};

/// Per-site (storefront / sales channel) sourcing settings.
///
/// Passed explicitly to the router for every invocation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub id: SiteId,
    pub name: String,
    #[serde(default)]
    pub multi_warehouse_enabled: bool,
    /// Distribution center used by the collect-at-hub policy.
    #[serde(default)]
    pub hub_warehouse_id: Option<WarehouseId>,
    #[serde(default)]
    pub default_policy: FulfillmentPolicy,
}

impl SiteConfig {
    pub fn new(id: SiteId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            multi_warehouse_enabled: false,
            hub_warehouse_id: None,
            default_policy: FulfillmentPolicy::default(),
        }
    }

    pub fn enabled(mut self) -> Self {
        self.multi_warehouse_enabled = true;
        self
    }

    pub fn with_hub(mut self, hub: WarehouseId) -> Self {
        self.hub_warehouse_id = Some(hub);
        self
    }

    pub fn with_policy(mut self, policy: FulfillmentPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// The order's own policy wins; otherwise the site default applies.
    pub fn effective_policy(&self, order: &Order) -> FulfillmentPolicy {
        order.policy.unwrap_or(self.default_policy)
    }

    /// Hub for an order: order-level override first, then the site hub.
    pub fn hub_for(&self, order: &Order) -> Option<WarehouseId> {
        order.hub_warehouse_id.or(self.hub_warehouse_id)
    }
}
