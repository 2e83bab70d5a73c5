//! Property-based tests for FIFO planning.
//!
//! The planner decides which batches an issuance draws from before anything
//! is written, so its invariants carry over to every issuance.

use cmms_stock::services::fifo::{fifo_unit_cost, plan_fifo_issue, BatchSlice};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn batches_strategy() -> impl Strategy<Value = Vec<BatchSlice>> {
    prop::collection::vec((1i32..200, 0u32..10_000), 0..12).prop_map(|raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (remaining, cents))| BatchSlice {
                batch_id: i as i32 + 1,
                remaining,
                unit_price: Decimal::new(i64::from(cents), 2),
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn plan_takes_exactly_what_is_asked_or_reports_the_gap(
        batches in batches_strategy(),
        quantity in 1i32..1_500,
    ) {
        let available: i32 = batches.iter().map(|b| b.remaining).sum();
        let plan = plan_fifo_issue(&batches, quantity);

        prop_assert_eq!(plan.planned_quantity() + plan.shortfall, quantity);
        prop_assert_eq!(plan.is_complete(), available >= quantity);
        prop_assert_eq!(plan.planned_quantity(), quantity.min(available));
    }

    #[test]
    fn plan_drains_batches_strictly_oldest_first(
        batches in batches_strategy(),
        quantity in 1i32..1_500,
    ) {
        let plan = plan_fifo_issue(&batches, quantity);

        // Consumptions are a prefix of the batch list.
        for (used, batch) in plan.consumptions.iter().zip(batches.iter()) {
            prop_assert_eq!(used.batch_id, batch.batch_id);
            prop_assert!(used.quantity > 0);
            prop_assert!(used.quantity <= batch.remaining);
        }
        // Only the last batch touched may be left partly used.
        if let Some((_, earlier)) = plan.consumptions.split_last() {
            for (used, batch) in earlier.iter().zip(batches.iter()) {
                prop_assert_eq!(used.quantity, batch.remaining);
            }
        }
    }

    #[test]
    fn unit_cost_stays_within_the_price_range_when_covered(
        batches in batches_strategy(),
        quantity in 1i32..1_500,
    ) {
        let available: i32 = batches.iter().map(|b| b.remaining).sum();
        prop_assume!(available >= quantity);

        let cost = fifo_unit_cost(&batches, quantity);
        let min = batches.iter().map(|b| b.unit_price).min().unwrap_or_default();
        let max = batches.iter().map(|b| b.unit_price).max().unwrap_or_default();
        prop_assert!(cost >= min && cost <= max, "{} outside [{}, {}]", cost, min, max);
    }

    #[test]
    fn non_positive_requests_plan_nothing(
        batches in batches_strategy(),
        quantity in -100i32..=0,
    ) {
        let plan = plan_fifo_issue(&batches, quantity);
        prop_assert!(plan.consumptions.is_empty());
        prop_assert!(fifo_unit_cost(&batches, quantity).is_zero());
    }
}
