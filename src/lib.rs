//! StateSet Sourcing
//!
//! Multi-warehouse sourcing and fulfillment routing: picks source warehouses
//! for confirmed order lines, routes them to direct shipment or hub
//! consolidation, and records the resulting stock movements.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod migrator;
pub mod models;
pub mod scenario;
pub mod services;

pub use errors::ServiceError;
pub use services::fulfillment::{FulfillmentService, LineReport, OrderFulfillmentReport};
pub use services::fulfillment_router::{FulfillmentRouter, RoutingOutcome};
pub use services::movement_builder::{MovementBuilder, TransitMode};
pub use services::source_selector::{SelectorSettings, SourceSelector};
