mod common;

use cmms_stock::{
    entities::stock_transaction::TransactionType,
    events::{Event, EventOutbox},
    services::{
        audit,
        reconciliation::{location_totals, REPAIR_REFERENCE},
        storage::AssignPartCommand,
    },
    UnitOfWork,
};
use common::TestContext;
use rust_decimal_macros::dec;
use sea_orm::TransactionTrait;

#[tokio::test]
async fn consistent_parts_report_nothing() {
    let ctx = TestContext::new().await;
    let part = ctx.part("RLY-24", dec!(4)).await;
    let bin = ctx.location("Rack 1").await;
    ctx.receive_at(part.id, 8, dec!(4), 1, bin.id).await;

    let found = ctx
        .services
        .reconciliation
        .validate_inventory_levels(None)
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn reports_each_mismatch_with_its_difference() {
    let ctx = TestContext::new().await;
    let located = ctx.part("FUSE-10A", dec!(1)).await;
    let loose = ctx.part("FUSE-16A", dec!(1)).await;
    let bin = ctx.location("Box F").await;

    ctx.receive_at(located.id, 10, dec!(1), 1, bin.id).await;
    ctx.seed_location_row(located.id, ctx.location("Box G").await.id, 4).await;
    ctx.receive_on(loose.id, 3, dec!(1), 1).await;

    let found = ctx
        .services
        .reconciliation
        .validate_inventory_levels(None)
        .await
        .unwrap();
    assert_eq!(found.len(), 2);

    let over = found.iter().find(|d| d.part_id == located.id).unwrap();
    assert_eq!(over.inventory_level, 10);
    assert_eq!(over.total_in_locations, 14);
    assert_eq!(over.difference, -4);
    assert_eq!(over.part_name, located.name);

    let under = found.iter().find(|d| d.part_id == loose.id).unwrap();
    assert_eq!(under.total_in_locations, 0);
    assert_eq!(under.difference, 3);

    let single = ctx
        .services
        .reconciliation
        .validate_inventory_levels(Some(loose.id))
        .await
        .unwrap();
    assert_eq!(single.len(), 1);
    assert_eq!(single[0].part_id, loose.id);
}

#[tokio::test]
async fn validation_is_read_only() {
    let ctx = TestContext::new().await;
    let part = ctx.part("CAP-100U", dec!(0.5)).await;
    ctx.receive_on(part.id, 7, dec!(0.5), 1).await;

    ctx.services
        .reconciliation
        .validate_inventory_levels(Some(part.id))
        .await
        .unwrap();
    assert_eq!(ctx.on_hand(part.id).await, 7);
}

#[tokio::test]
async fn repair_sets_level_to_location_total() {
    let mut ctx = TestContext::new().await;
    let part = ctx.part("SNS-PNP", dec!(22)).await;
    let bin = ctx.location("Cabinet 3").await;
    ctx.receive_on(part.id, 9, dec!(22), 1).await;
    ctx.seed_location_row(part.id, bin.id, 6).await;
    ctx.drain_events();

    let repaired = ctx
        .services
        .reconciliation
        .fix_inventory_level_discrepancy(part.id, Some(42), UnitOfWork::Owned)
        .await
        .unwrap();
    assert!(repaired);
    assert_eq!(ctx.on_hand(part.id).await, 6);

    let ledger = ctx.transactions(part.id).await;
    let adjustment = ledger.last().unwrap();
    assert_eq!(adjustment.kind(), Some(TransactionType::Adjustment));
    assert_eq!(adjustment.quantity, -3);
    assert_eq!(adjustment.reference_type.as_deref(), Some(REPAIR_REFERENCE));
    assert_eq!(adjustment.user_id, Some(42));
    assert_eq!(ledger.iter().map(|t| t.quantity).sum::<i32>(), 6);

    let remaining = ctx
        .services
        .reconciliation
        .validate_inventory_levels(Some(part.id))
        .await
        .unwrap();
    assert!(remaining.is_empty());

    let events = ctx.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        Event::InventoryLevelRepaired {
            old_quantity: 9,
            new_quantity: 6,
            ..
        }
    )));

    let trail = audit::entries_for(ctx.db.as_ref(), "inventory_level", part.id)
        .await
        .unwrap();
    let entry = trail.last().expect("repair should be audited");
    assert_eq!(entry.action_type, "repair");
    assert_eq!(entry.user_id, Some(42));
}

#[tokio::test]
async fn repair_without_locations_zeroes_the_level() {
    let ctx = TestContext::new().await;
    let part = ctx.part("WASH-M6", dec!(0.05)).await;
    ctx.receive_on(part.id, 50, dec!(0.05), 1).await;

    assert!(ctx
        .services
        .reconciliation
        .fix_inventory_level_discrepancy(part.id, None, UnitOfWork::Owned)
        .await
        .unwrap());
    assert_eq!(ctx.on_hand(part.id).await, 0);
    let ledger: Vec<i32> = ctx.transactions(part.id).await.iter().map(|t| t.quantity).collect();
    assert_eq!(ledger, vec![50, -50]);
}

#[tokio::test]
async fn repair_of_a_consistent_part_books_nothing() {
    let ctx = TestContext::new().await;
    let part = ctx.part("NUT-M6", dec!(0.03)).await;
    let bin = ctx.location("Drawer 6").await;
    ctx.receive_at(part.id, 20, dec!(0.03), 1, bin.id).await;

    assert!(ctx
        .services
        .reconciliation
        .fix_inventory_level_discrepancy(part.id, None, UnitOfWork::Owned)
        .await
        .unwrap());
    assert_eq!(ctx.on_hand(part.id).await, 20);
    assert_eq!(ctx.transactions(part.id).await.len(), 1);
}

#[tokio::test]
async fn location_totals_are_summed_per_part() {
    let ctx = TestContext::new().await;
    let left = ctx.part("PIN-L", dec!(0.1)).await;
    let right = ctx.part("PIN-R", dec!(0.1)).await;
    let (a, b, c) = (
        ctx.location("Pin A").await,
        ctx.location("Pin B").await,
        ctx.location("Pin C").await,
    );
    ctx.seed_location_row(left.id, a.id, 3).await;
    ctx.seed_location_row(left.id, b.id, 4).await;
    ctx.seed_location_row(right.id, c.id, 9).await;

    let totals = location_totals(ctx.db.as_ref(), None).await.unwrap();
    assert_eq!(totals.len(), 2);
    assert_eq!(totals[&left.id], 7);
    assert_eq!(totals[&right.id], 9);

    let only_right = location_totals(ctx.db.as_ref(), Some(right.id)).await.unwrap();
    assert_eq!(only_right.len(), 1);
    assert_eq!(only_right[&right.id], 9);
}

#[tokio::test]
async fn repair_of_unknown_part_reports_false() {
    let ctx = TestContext::new().await;
    let repaired = ctx
        .services
        .reconciliation
        .fix_inventory_level_discrepancy(12345, None, UnitOfWork::Owned)
        .await
        .unwrap();
    assert!(!repaired);
}

#[tokio::test]
async fn joined_repair_follows_the_callers_decision() {
    let mut ctx = TestContext::new().await;
    let part = ctx.part("TIMER-1", dec!(30)).await;
    let bin = ctx.location("Panel").await;
    ctx.receive_on(part.id, 4, dec!(30), 1).await;
    ctx.seed_location_row(part.id, bin.id, 1).await;
    ctx.drain_events();

    let outbox = EventOutbox::new();
    let txn = ctx.db.begin().await.unwrap();
    ctx.services
        .reconciliation
        .fix_inventory_level_discrepancy(part.id, None, UnitOfWork::Joined(&txn, &outbox))
        .await
        .unwrap();
    txn.rollback().await.unwrap();
    assert_eq!(outbox.discard().await, 1);

    assert!(ctx.drain_events().is_empty());
    assert_eq!(ctx.on_hand(part.id).await, 4);
    assert_eq!(ctx.transactions(part.id).await.len(), 1);
}

#[tokio::test]
async fn assigning_stock_publishes_remaining_discrepancy() {
    let mut ctx = TestContext::new().await;
    let part = ctx.part("KEY-8X7", dec!(0.8)).await;
    let bin = ctx.location("Tray").await;
    ctx.receive_on(part.id, 10, dec!(0.8), 1).await;
    ctx.drain_events();

    ctx.services
        .storage
        .assign_part_to_location(
            AssignPartCommand {
                part_id: part.id,
                storage_location_id: bin.id,
                quantity: 4,
                notes: None,
                user_id: None,
            },
            UnitOfWork::Owned,
        )
        .await
        .unwrap();

    let events = ctx.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::DiscrepancyDetected { difference: 6, .. })));
}
