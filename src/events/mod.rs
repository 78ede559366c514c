use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{OrderId, OrderLineId, ProductId, SkipReason, WarehouseId};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Sends without waiting; fails when the channel is full or closed.
    pub fn try_send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .try_send(event)
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }
}

// Events emitted while resolving order lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    LineRouted {
        order_id: OrderId,
        line_id: OrderLineId,
        outcome: String,
    },
    MovementsCreated {
        order_id: OrderId,
        line_id: OrderLineId,
        movement_ids: Vec<Uuid>,
    },
    ShortfallRecorded {
        order_id: OrderId,
        line_id: OrderLineId,
        product_id: ProductId,
        requested: Decimal,
        shortfall: Decimal,
    },
    SourceSkipped {
        line_id: OrderLineId,
        warehouse_id: WarehouseId,
        reason: SkipReason,
    },
    FulfillmentFailed {
        order_id: OrderId,
        line_id: OrderLineId,
        code: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

// Handlers implementing this trait process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

// Drains the channel, logging each event; runs until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::LineRouted {
                order_id,
                line_id,
                outcome,
            } => {
                info!(order_id, line_id, outcome = %outcome, "Line routed");
            }
            Event::MovementsCreated {
                order_id,
                line_id,
                movement_ids,
            } => {
                info!(order_id, line_id, count = movement_ids.len(), "Movements created");
            }
            Event::ShortfallRecorded {
                order_id,
                line_id,
                product_id,
                requested,
                shortfall,
            } => {
                warn!(
                    order_id,
                    line_id,
                    product_id,
                    %requested,
                    %shortfall,
                    "Shortfall recorded"
                );
            }
            Event::SourceSkipped {
                line_id,
                warehouse_id,
                reason,
            } => {
                warn!(line_id, warehouse_id, reason = reason.as_str(), "Source skipped");
            }
            Event::FulfillmentFailed {
                order_id,
                line_id,
                code,
                error,
                timestamp,
            } => {
                warn!(
                    order_id,
                    line_id,
                    code = %code,
                    %timestamp,
                    error = %error,
                    "Fulfillment failed"
                );
            }
        }
    }

    warn!("Event processing loop has ended");
}

/// Feeds every received event to `handler`, logging handler failures.
pub async fn dispatch_events<H: EventHandler>(mut rx: mpsc::Receiver<Event>, handler: H) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = handler.handle_event(event).await {
            warn!("Event handler failed: {}", e);
        }
    }
}
