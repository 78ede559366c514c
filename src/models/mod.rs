// Domain models for multi-warehouse sourcing
pub mod allocation;
pub mod movement;
pub mod order;
pub mod site;
pub mod warehouse;

pub type CompanyId = i64;
pub type SiteId = i64;
pub type WarehouseId = i64;
pub type LocationId = i64;
pub type OperationTypeId = i64;
pub type ProductId = i64;
pub type OrderId = i64;
pub type OrderLineId = i64;
pub type ProcurementGroupId = i64;

pub use allocation::{
    Allocation, AllocationEntry, SkipReason, SkippedSource, ALLOCATION_EPSILON, QUANTITY_TOLERANCE,
};
pub use movement::{Movement, MovementKind, MovementSpec, MovementState};
pub use order::{parse_source_selection, FulfillmentPolicy, Order, OrderLine, Product, ProductKind};
pub use site::SiteConfig;
pub use warehouse::Warehouse;
