use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::ServiceError;
use crate::models::{OrderId, OrderLineId, ProcurementGroupId, ProductId, WarehouseId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcurementReason {
    /// The line was never handled by multi-warehouse sourcing.
    Delegated,
    /// Quantity the sources could not cover, requested at the hub.
    HubShortfall,
    /// Quantity direct shipping could not cover.
    DirectShortfall,
}

impl ProcurementReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcurementReason::Delegated => "delegated",
            ProcurementReason::HubShortfall => "hub_shortfall",
            ProcurementReason::DirectShortfall => "direct_shortfall",
        }
    }
}

/// Demand handed back to the host's single-warehouse procurement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcurementRequest {
    pub order_id: OrderId,
    pub line_id: OrderLineId,
    pub product_id: ProductId,
    pub quantity: Decimal,
    /// Warehouse whose rules fulfil the request.
    pub warehouse_id: WarehouseId,
    pub procurement_group_id: Option<ProcurementGroupId>,
    pub reason: ProcurementReason,
}

#[async_trait]
pub trait StandardProcurement: Send + Sync {
    async fn procure(&self, request: ProcurementRequest) -> Result<(), ServiceError>;
}

/// Keeps every request in memory.
#[derive(Debug, Default)]
pub struct RecordingProcurement {
    requests: Mutex<Vec<ProcurementRequest>>,
}

impl RecordingProcurement {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn requests(&self) -> Vec<ProcurementRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl StandardProcurement for RecordingProcurement {
    async fn procure(&self, request: ProcurementRequest) -> Result<(), ServiceError> {
        info!(
            line_id = request.line_id,
            warehouse_id = request.warehouse_id,
            quantity = %request.quantity,
            reason = request.reason.as_str(),
            "Standard procurement requested"
        );
        self.requests.lock().await.push(request);
        Ok(())
    }
}
