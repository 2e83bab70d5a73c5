mod common;

use assert_matches::assert_matches;
use cmms_stock::{
    entities::{part::DEFAULT_UNIT, stock_transaction::TransactionType},
    events::Event,
    services::{
        audit,
        parts::{NewPart, NewSupplier, PartChanges},
    },
    ServiceError, UnitOfWork,
};
use common::{assert_money_eq, TestContext};
use rstest::rstest;
use rust_decimal_macros::dec;

fn supplier(name: &str) -> NewSupplier {
    NewSupplier {
        name: name.to_string(),
        contact_person: None,
        email: Some("orders@example.com".to_string()),
        phone: None,
    }
}

#[tokio::test]
async fn new_parts_start_with_an_empty_level() {
    let ctx = TestContext::new().await;
    let part = ctx.part("PLC-IO16", dec!(210)).await;

    assert_eq!(part.unit, DEFAULT_UNIT);
    let level = ctx.services.parts.get_inventory_level(part.id).await.unwrap();
    assert_eq!(level.quantity_on_hand, 0);
    assert_eq!(level.quantity_available(), 0);
    assert!(ctx.batches(part.id).await.is_empty());
}

#[tokio::test]
async fn initial_quantity_is_received_into_a_batch() {
    let mut ctx = TestContext::new().await;
    let vendor = ctx
        .services
        .parts
        .create_supplier(supplier("Bearings Ltd"))
        .await
        .unwrap();
    let shelf = ctx.location("Shelf B").await;

    let part = ctx
        .services
        .parts
        .create_part(
            NewPart {
                supplier_id: Some(vendor.id),
                initial_quantity: 12,
                initial_location_id: Some(shelf.id),
                user_id: Some(5),
                ..NewPart::new("BRG-6001", "Deep groove bearing", dec!(3.75))
            },
            UnitOfWork::Owned,
        )
        .await
        .unwrap();

    assert_eq!(ctx.on_hand(part.id).await, 12);
    let batches = ctx.batches(part.id).await;
    assert_eq!(batches.len(), 1);
    assert_money_eq(batches[0].unit_price, dec!(3.75));
    assert_eq!(batches[0].supplier_id, Some(vendor.id));
    assert_eq!(ctx.location_quantity(part.id, shelf.id).await, Some(12));

    let ledger = ctx.transactions(part.id).await;
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].kind(), Some(TransactionType::Received));
    assert_eq!(ledger[0].user_id, Some(5));

    assert!(ctx
        .drain_events()
        .iter()
        .any(|e| matches!(e, Event::StockReceived { quantity: 12, .. })));
}

#[rstest]
#[case("A")]
#[case("has space")]
#[case("semi;colon")]
#[tokio::test]
async fn malformed_skus_are_rejected(#[case] sku: &str) {
    let ctx = TestContext::new().await;
    let err = ctx
        .services
        .parts
        .create_part(NewPart::new(sku, "Bad", dec!(1)), UnitOfWork::Owned)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn duplicate_skus_and_suppliers_conflict() {
    let ctx = TestContext::new().await;
    ctx.part("DUP-1", dec!(1)).await;
    let err = ctx
        .services
        .parts
        .create_part(NewPart::new("DUP-1", "Again", dec!(1)), UnitOfWork::Owned)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    ctx.services
        .parts
        .create_supplier(supplier("Acme"))
        .await
        .unwrap();
    let err = ctx
        .services
        .parts
        .create_supplier(supplier("Acme"))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));
}

#[tokio::test]
async fn unknown_supplier_is_not_found() {
    let ctx = TestContext::new().await;
    let err = ctx
        .services
        .parts
        .create_part(
            NewPart {
                supplier_id: Some(31),
                ..NewPart::new("SUP-X", "No vendor", dec!(1))
            },
            UnitOfWork::Owned,
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
    assert!(ctx.services.parts.get_part_by_sku("SUP-X").await.unwrap().is_none());
}

#[tokio::test]
async fn supplier_email_is_validated() {
    let ctx = TestContext::new().await;
    let err = ctx
        .services
        .parts
        .create_supplier(NewSupplier {
            email: Some("not-an-email".into()),
            ..supplier("Broken")
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn updates_are_applied_and_audited() {
    let ctx = TestContext::new().await;
    let part = ctx.part("MTR-750", dec!(80)).await;

    let updated = ctx
        .services
        .parts
        .update_part(
            part.id,
            PartChanges {
                buy_price: Some(dec!(85)),
                safety_stock: Some(2),
                bin_location: Some(Some("R2-S4".into())),
                change_reason: Some("price list 2024".into()),
                ..PartChanges::default()
            },
            Some(8),
        )
        .await
        .unwrap();
    assert_money_eq(updated.buy_price, dec!(85));
    assert_eq!(updated.safety_stock, 2);

    let level = ctx.services.parts.get_inventory_level(part.id).await.unwrap();
    assert_eq!(level.bin_location.as_deref(), Some("R2-S4"));

    let trail = audit::entries_for(ctx.db.as_ref(), "part", part.id)
        .await
        .unwrap();
    let entry = trail.last().unwrap();
    assert_eq!(entry.action_type, "update");
    assert_eq!(entry.user_id, Some(8));
    let metadata: serde_json::Value =
        serde_json::from_str(entry.metadata.as_deref().unwrap()).unwrap();
    assert!(metadata["changes"].get("buy_price").is_some());
    assert!(metadata["changes"].get("bin_location").is_some());
    assert!(metadata["changes"].get("name").is_none());
    assert_eq!(metadata["reason"], "price list 2024");
}

#[tokio::test]
async fn invalid_updates_are_rejected() {
    let ctx = TestContext::new().await;
    let part = ctx.part("MTR-1100", dec!(95)).await;

    let err = ctx
        .services
        .parts
        .update_part(
            part.id,
            PartChanges {
                sell_price: Some(dec!(-1)),
                ..PartChanges::default()
            },
            None,
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = ctx
        .services
        .parts
        .update_part(999, PartChanges::default(), None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PartNotFound(999));
}

#[tokio::test]
async fn parts_with_history_cannot_be_deleted() {
    let ctx = TestContext::new().await;
    let used = ctx.part("DEL-1", dec!(1)).await;
    let unused = ctx.part("DEL-2", dec!(1)).await;
    ctx.receive_on(used.id, 1, dec!(1), 1).await;

    let err = ctx
        .services
        .parts
        .delete_part(used.id, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    ctx.services.parts.delete_part(unused.id, None).await.unwrap();
    assert_matches!(
        ctx.services.parts.get_part(unused.id).await,
        Err(ServiceError::PartNotFound(_))
    );
    assert_matches!(
        ctx.services.parts.get_inventory_level(unused.id).await,
        Err(ServiceError::InventoryLevelNotFound(_))
    );
}

#[tokio::test]
async fn listing_and_lookup() {
    let ctx = TestContext::new().await;
    let b = ctx
        .services
        .parts
        .create_part(NewPart::new("LST-B", "Bravo", dec!(1)), UnitOfWork::Owned)
        .await
        .unwrap();
    let a = ctx
        .services
        .parts
        .create_part(NewPart::new("LST-A", "Alpha", dec!(1)), UnitOfWork::Owned)
        .await
        .unwrap();
    ctx.receive_on(a.id, 3, dec!(1), 1).await;

    let listed = ctx.services.parts.list_parts(None, 0).await.unwrap();
    let names: Vec<&str> = listed.iter().map(|(p, _)| p.name.as_str()).collect();
    assert_eq!(names, vec!["Alpha", "Bravo"]);
    assert_eq!(listed[0].1.as_ref().map(|l| l.quantity_on_hand), Some(3));

    let page = ctx.services.parts.list_parts(Some(1), 1).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].0.id, b.id);
    assert_eq!(ctx.services.parts.count_parts().await.unwrap(), 2);

    let by_sku = ctx.services.parts.get_part_by_sku("LST-A").await.unwrap();
    assert_eq!(by_sku.map(|p| p.id), Some(a.id));

    let levels = ctx
        .services
        .parts
        .get_inventory_levels(&[a.id, b.id, 404])
        .await
        .unwrap();
    assert_eq!(levels.len(), 2);
    assert_eq!(levels[&a.id].quantity_on_hand, 3);
    assert_eq!(levels[&b.id].quantity_on_hand, 0);
    assert!(ctx
        .services
        .parts
        .get_inventory_levels(&[])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn low_stock_report_uses_safety_stock() {
    let ctx = TestContext::new().await;
    let low = ctx
        .services
        .parts
        .create_part(
            NewPart {
                safety_stock: 5,
                initial_quantity: 2,
                ..NewPart::new("LOW-1", "Low", dec!(1))
            },
            UnitOfWork::Owned,
        )
        .await
        .unwrap();
    ctx.services
        .parts
        .create_part(
            NewPart {
                safety_stock: 5,
                initial_quantity: 20,
                ..NewPart::new("OK-1", "Plenty", dec!(1))
            },
            UnitOfWork::Owned,
        )
        .await
        .unwrap();

    let report = ctx.services.parts.low_stock_parts().await.unwrap();
    let ids: Vec<i32> = report.iter().map(|(p, _)| p.id).collect();
    assert_eq!(ids, vec![low.id]);
}
