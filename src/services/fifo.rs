//! FIFO planning over a part's open batches.
//!
//! The planner is pure: the stock service loads batches oldest-first, asks
//! for a plan, and only writes when the plan covers the whole request. A
//! request that cannot be covered therefore never touches a batch.

use crate::entities::stock_batch;
use rust_decimal::Decimal;
use serde::Serialize;

/// The part of a batch the planner needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSlice {
    pub batch_id: i32,
    pub remaining: i32,
    pub unit_price: Decimal,
}

impl From<&stock_batch::Model> for BatchSlice {
    fn from(batch: &stock_batch::Model) -> Self {
        Self {
            batch_id: batch.id,
            remaining: batch.quantity_remaining,
            unit_price: batch.unit_price,
        }
    }
}

/// Units taken from one batch by an issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchConsumption {
    pub batch_id: i32,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl BatchConsumption {
    pub fn cost(&self) -> Decimal {
        Decimal::from(self.quantity) * self.unit_price
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FifoPlan {
    pub consumptions: Vec<BatchConsumption>,
    /// Units the open batches could not cover.
    pub shortfall: i32,
}

impl FifoPlan {
    pub fn is_complete(&self) -> bool {
        self.shortfall == 0
    }

    pub fn planned_quantity(&self) -> i32 {
        self.consumptions.iter().map(|c| c.quantity).sum()
    }

    pub fn total_cost(&self) -> Decimal {
        self.consumptions.iter().map(BatchConsumption::cost).sum()
    }
}

/// Walks `batches` (already in FIFO order) taking as much of each as needed
/// until `quantity` units are covered. Empty batches are skipped.
pub fn plan_fifo_issue(batches: &[BatchSlice], quantity: i32) -> FifoPlan {
    let mut remaining = quantity.max(0);
    let mut consumptions = Vec::new();

    for batch in batches {
        if remaining == 0 {
            break;
        }
        if batch.remaining <= 0 {
            continue;
        }
        let take = remaining.min(batch.remaining);
        consumptions.push(BatchConsumption {
            batch_id: batch.batch_id,
            quantity: take,
            unit_price: batch.unit_price,
        });
        remaining -= take;
    }

    FifoPlan {
        consumptions,
        shortfall: remaining,
    }
}

/// Average unit cost of the next `quantity` units under FIFO.
///
/// The total is divided by the requested quantity even when the batches
/// cover less of it, so uncovered units count at zero cost.
pub fn fifo_unit_cost(batches: &[BatchSlice], quantity: i32) -> Decimal {
    if quantity <= 0 {
        return Decimal::ZERO;
    }
    plan_fifo_issue(batches, quantity).total_cost() / Decimal::from(quantity)
}
