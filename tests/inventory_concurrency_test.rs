mod common;

use assert_matches::assert_matches;
use cmms_stock::{
    services::{stock::IssueStockCommand, worksheets::AddWorksheetPart},
    ServiceError, UnitOfWork,
};
use common::TestContext;
use futures::future::join_all;
use rust_decimal_macros::dec;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_issues_never_oversell() {
    let ctx = TestContext::new().await;
    let part = ctx.part("CONC-1", dec!(1)).await;
    ctx.receive_on(part.id, 4, dec!(1), 1).await;
    ctx.receive_on(part.id, 6, dec!(2), 2).await;

    let tasks = (0..20).map(|_| {
        let stock = ctx.services.stock.clone();
        let part_id = part.id;
        tokio::spawn(async move {
            stock
                .issue_stock(IssueStockCommand::new(part_id, -1), UnitOfWork::Owned)
                .await
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 10);
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_matches!(failure, ServiceError::InsufficientStock { .. });
    }

    assert_eq!(ctx.on_hand(part.id).await, 0);
    assert!(ctx.batches(part.id).await.iter().all(|b| b.quantity_remaining == 0));
    let ledger: i32 = ctx.transactions(part.id).await.iter().map(|t| t.quantity).sum();
    assert_eq!(ledger, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_worksheet_usage_across_parts() {
    let ctx = TestContext::new().await;
    let left = ctx.part("CONC-L", dec!(1)).await;
    let right = ctx.part("CONC-R", dec!(1)).await;
    ctx.receive_on(left.id, 5, dec!(1), 1).await;
    ctx.receive_on(right.id, 5, dec!(1), 1).await;
    let ws = ctx
        .services
        .worksheets
        .create_worksheet(1, "Line overhaul", None)
        .await
        .unwrap();

    let tasks = (0..16).map(|i| {
        let worksheets = ctx.services.worksheets.clone();
        let part_id = if i % 2 == 0 { left.id } else { right.id };
        let worksheet_id = ws.id;
        tokio::spawn(async move {
            worksheets
                .add_part_to_worksheet(
                    AddWorksheetPart::new(worksheet_id, part_id, 1),
                    UnitOfWork::Owned,
                )
                .await
        })
    });
    let results: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 10);
    assert_eq!(ctx.on_hand(left.id).await, 0);
    assert_eq!(ctx.on_hand(right.id).await, 0);

    let lines = ctx
        .services
        .worksheets
        .list_worksheet_parts(ws.id)
        .await
        .unwrap();
    assert_eq!(lines.len(), 10);
}
