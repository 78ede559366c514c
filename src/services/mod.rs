// Stock and warehouse read ports
pub mod availability;
pub mod warehouses;

// Sourcing and routing
pub mod fulfillment_router;
pub mod source_selector;

// Movement creation and the ledgers behind it
pub mod db_ledger;
pub mod movement_builder;
pub mod movement_ledger;
pub mod reservation_scheduler;

// Order confirmation orchestration
pub mod fulfillment;
pub mod procurement;
