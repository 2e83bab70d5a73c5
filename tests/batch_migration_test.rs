mod common;

use cmms_stock::{
    entities::stock_transaction::TransactionType,
    events::Event,
    services::stock::IssueStockCommand,
    UnitOfWork,
};
use common::{assert_money_eq, TestContext};
use rust_decimal_macros::dec;

#[tokio::test]
async fn backfill_opens_one_batch_per_untracked_part() {
    let mut ctx = TestContext::new().await;
    let legacy = ctx.part("LEG-1", dec!(12.5)).await;
    let tracked = ctx.part("TRK-1", dec!(3)).await;
    let empty = ctx.part("EMP-1", dec!(9)).await;
    ctx.seed_legacy_level(legacy.id, 40).await;
    ctx.receive_on(tracked.id, 5, dec!(3), 1).await;
    ctx.drain_events();

    let report = ctx
        .services
        .stock
        .migrate_existing_stock_to_batches(Some(1), UnitOfWork::Owned)
        .await
        .unwrap();
    assert_eq!(report.parts_migrated, 1);
    assert_eq!(report.skipped_with_batches, 1);
    assert_eq!(report.skipped_missing_part, 0);

    let batches = ctx.batches(legacy.id).await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].quantity, 40);
    assert_eq!(batches[0].quantity_remaining, 40);
    assert_money_eq(batches[0].unit_price, dec!(12.5));

    let ledger = ctx.transactions(legacy.id).await;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].kind(), Some(TransactionType::InitialStock));
    assert_eq!(ledger[0].quantity, 40);
    assert_eq!(batches[0].stock_transaction_id, Some(ledger[0].id));

    assert_eq!(ctx.batches(tracked.id).await.len(), 1);
    assert!(ctx.batches(empty.id).await.is_empty());
    assert_eq!(ctx.on_hand(legacy.id).await, 40);

    assert!(ctx
        .drain_events()
        .iter()
        .any(|e| matches!(e, Event::BatchesBackfilled { parts_migrated: 1 })));
}

#[tokio::test]
async fn running_the_backfill_twice_is_a_no_op() {
    let ctx = TestContext::new().await;
    let legacy = ctx.part("LEG-2", dec!(4)).await;
    ctx.seed_legacy_level(legacy.id, 15).await;

    ctx.services
        .stock
        .migrate_existing_stock_to_batches(None, UnitOfWork::Owned)
        .await
        .unwrap();
    let second = ctx
        .services
        .stock
        .migrate_existing_stock_to_batches(None, UnitOfWork::Owned)
        .await
        .unwrap();

    assert_eq!(second.parts_migrated, 0);
    assert_eq!(second.skipped_with_batches, 1);
    assert_eq!(ctx.batches(legacy.id).await.len(), 1);
    assert_eq!(ctx.transactions(legacy.id).await.len(), 1);
}

#[tokio::test]
async fn parts_with_only_exhausted_batches_are_not_backfilled() {
    let ctx = TestContext::new().await;
    let part = ctx.part("LEG-3", dec!(2)).await;
    ctx.receive_on(part.id, 3, dec!(2), 1).await;
    ctx.services
        .stock
        .issue_stock(IssueStockCommand::new(part.id, -3), UnitOfWork::Owned)
        .await
        .unwrap();
    ctx.seed_legacy_level(part.id, 5).await;

    let report = ctx
        .services
        .stock
        .migrate_existing_stock_to_batches(None, UnitOfWork::Owned)
        .await
        .unwrap();
    assert_eq!(report.parts_migrated, 0);
    assert_eq!(ctx.batches(part.id).await.len(), 1);
}

#[tokio::test]
async fn backfilled_stock_is_issued_through_fifo() {
    let ctx = TestContext::new().await;
    let legacy = ctx.part("LEG-4", dec!(7)).await;
    ctx.seed_legacy_level(legacy.id, 10).await;
    ctx.services
        .stock
        .migrate_existing_stock_to_batches(None, UnitOfWork::Owned)
        .await
        .unwrap();

    let outcome = ctx
        .services
        .stock
        .issue_stock(IssueStockCommand::new(legacy.id, -4), UnitOfWork::Owned)
        .await
        .unwrap();
    assert_eq!(outcome.costing.batches().len(), 1);
    assert_money_eq(outcome.costing.total_cost().unwrap(), dec!(28));
    assert_eq!(ctx.batches(legacy.id).await[0].quantity_remaining, 6);
    assert_eq!(ctx.on_hand(legacy.id).await, 6);
}
