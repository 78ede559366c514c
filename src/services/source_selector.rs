//! Source Selector
//!
//! Apportions a required quantity across candidate warehouses from a single
//! availability snapshot. Nothing is reserved here; the ledger's reservation
//! pass is the only place stock gets locked.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::errors::ServiceError;
use crate::models::{
    Allocation, AllocationEntry, LocationId, ProductId, SkipReason, SkippedSource, Warehouse,
    ALLOCATION_EPSILON, QUANTITY_TOLERANCE,
};
use crate::services::availability::AvailabilityOracle;

/// Decimal places kept on proportional shares.
const SHARE_SCALE: u32 = 6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Drain each candidate in order before touching the next.
    #[default]
    SequentialGreedy,
    /// Split the need in proportion to each candidate's availability.
    Proportional,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrdering {
    /// Rank ascending, then id ascending; unranked warehouses last.
    #[default]
    Priority,
    /// Most available first, then id ascending.
    Availability,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSettings {
    #[serde(default)]
    pub strategy: AllocationStrategy,
    #[serde(default)]
    pub ordering: SourceOrdering,
}

#[derive(Debug)]
struct Candidate<'a> {
    warehouse: &'a Warehouse,
    available: Decimal,
}

#[derive(Clone)]
pub struct SourceSelector {
    oracle: Arc<dyn AvailabilityOracle>,
    settings: SelectorSettings,
}

impl SourceSelector {
    pub fn new(oracle: Arc<dyn AvailabilityOracle>, settings: SelectorSettings) -> Self {
        Self { oracle, settings }
    }

    pub fn settings(&self) -> SelectorSettings {
        self.settings
    }

    /// Allocates `required` of `product_id` over `candidates`.
    pub async fn allocate(
        &self,
        product_id: ProductId,
        required: Decimal,
        candidates: &[Warehouse],
    ) -> Result<Allocation, ServiceError> {
        self.allocate_with(product_id, required, candidates, |_| None)
            .await
    }

    /// Like [`allocate`](Self::allocate), with a caller check that can exclude
    /// a candidate before it is queried.
    #[instrument(skip(self, candidates, eligibility), fields(candidates = candidates.len()))]
    pub async fn allocate_with<F>(
        &self,
        product_id: ProductId,
        required: Decimal,
        candidates: &[Warehouse],
        eligibility: F,
    ) -> Result<Allocation, ServiceError>
    where
        F: Fn(&Warehouse) -> Option<SkipReason> + Send,
    {
        if required.is_sign_negative() && !required.is_zero() {
            return Err(ServiceError::ValidationError(format!(
                "Required quantity must not be negative, got {}",
                required
            )));
        }

        let mut allocation = Allocation::empty(product_id, required);
        let mut seen = BTreeSet::new();
        let mut usable: Vec<(&Warehouse, LocationId)> = Vec::with_capacity(candidates.len());

        for warehouse in candidates {
            if !seen.insert(warehouse.id) {
                continue;
            }
            let Some(location_id) = warehouse.stock_location_id else {
                warn!(warehouse_id = warehouse.id, "Skipping source without a stock location");
                allocation
                    .skipped
                    .push(SkippedSource::new(warehouse.id, SkipReason::MissingStockLocation));
                continue;
            };
            if let Some(reason) = eligibility(warehouse) {
                warn!(
                    warehouse_id = warehouse.id,
                    reason = reason.as_str(),
                    "Skipping ineligible source"
                );
                allocation
                    .skipped
                    .push(SkippedSource::new(warehouse.id, reason));
                continue;
            }
            usable.push((warehouse, location_id));
        }

        let mut ranked = Vec::with_capacity(usable.len());
        for (warehouse, location_id) in usable {
            let available = self
                .oracle
                .available(product_id, location_id)
                .await?
                .max(Decimal::ZERO);
            debug!(warehouse_id = warehouse.id, %available, "Queried source availability");
            ranked.push(Candidate {
                warehouse,
                available,
            });
        }

        match self.settings.ordering {
            SourceOrdering::Priority => ranked.sort_by_key(|c| c.warehouse.sort_key()),
            SourceOrdering::Availability => {
                ranked.sort_by_key(|c| (Reverse(c.available), c.warehouse.id))
            }
        }

        let entries = match self.settings.strategy {
            AllocationStrategy::SequentialGreedy => greedy(required, &ranked),
            AllocationStrategy::Proportional => proportional(required, &ranked),
        };

        let allocated: Decimal = entries.iter().map(|e| e.quantity).sum();
        allocation.entries = entries;
        allocation.shortfall = required - allocated;

        debug!(
            %allocated,
            shortfall = %allocation.shortfall,
            sources = allocation.entries.len(),
            "Allocation computed"
        );

        Ok(allocation)
    }
}

fn greedy(required: Decimal, ranked: &[Candidate<'_>]) -> Vec<AllocationEntry> {
    let mut remaining = required;
    let mut entries = Vec::new();

    for candidate in ranked {
        if remaining <= QUANTITY_TOLERANCE {
            break;
        }
        let take = remaining.min(candidate.available);
        if take > ALLOCATION_EPSILON {
            entries.push(AllocationEntry {
                warehouse_id: candidate.warehouse.id,
                quantity: take,
            });
            remaining -= take;
        }
    }

    entries
}

fn proportional(required: Decimal, ranked: &[Candidate<'_>]) -> Vec<AllocationEntry> {
    let stocked: Vec<&Candidate<'_>> = ranked
        .iter()
        .filter(|c| c.available > Decimal::ZERO)
        .collect();
    let total: Decimal = stocked.iter().map(|c| c.available).sum();

    // Not enough to split: everyone gives everything.
    if total <= required {
        return greedy(required, ranked);
    }

    let mut entries = Vec::with_capacity(stocked.len());
    let mut assigned = Decimal::ZERO;

    for (index, candidate) in stocked.iter().enumerate() {
        let remaining = required - assigned;
        let share = if index + 1 == stocked.len() {
            remaining
        } else {
            (required * candidate.available / total).round_dp(SHARE_SCALE)
        };
        let share = share.min(candidate.available).min(remaining);

        if share > ALLOCATION_EPSILON {
            entries.push(AllocationEntry {
                warehouse_id: candidate.warehouse.id,
                quantity: share,
            });
            assigned += share;
        }
    }

    entries
}
