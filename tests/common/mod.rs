#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use cmms_stock::{
    config::{AppConfig, StockConfig},
    db::{self, DbPool},
    entities::{inventory_level, part, part_location, stock_batch, stock_transaction, storage_location},
    events::{Event, EventSender},
    services::{
        parts::NewPart,
        stock::ReceiveStockCommand,
        storage::NewStorageLocation,
    },
    AppServices, UnitOfWork,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use tokio::sync::mpsc;

/// Services over a fresh in-memory SQLite database.
///
/// The pool holds a single connection so every test sees one database and
/// concurrent transactions queue for it.
pub struct TestContext {
    pub db: Arc<DbPool>,
    pub services: AppServices,
    pub event_sender: EventSender,
    events: mpsc::Receiver<Event>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_settings(StockConfig::default()).await
    }

    pub async fn with_settings(settings: StockConfig) -> Self {
        cmms_stock::config::init_tracing("warn", false);

        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 60;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        let db = Arc::new(pool);

        let (tx, rx) = mpsc::channel(4096);
        let event_sender = EventSender::new(tx);
        let services = AppServices::new(db.clone(), event_sender.clone(), settings);

        Self {
            db,
            services,
            event_sender,
            events: rx,
        }
    }

    /// Events published since the last call.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn part(&self, sku: &str, buy_price: Decimal) -> part::Model {
        self.services
            .parts
            .create_part(NewPart::new(sku, format!("Part {}", sku), buy_price), UnitOfWork::Owned)
            .await
            .expect("failed to create part")
    }

    pub async fn location(&self, name: &str) -> storage_location::Model {
        self.services
            .storage
            .create_storage_location(NewStorageLocation::named(name))
            .await
            .expect("failed to create storage location")
    }

    /// Receives stock dated `day` days into 2024, which fixes its FIFO slot.
    pub async fn receive_on(
        &self,
        part_id: i32,
        quantity: i32,
        unit_price: Decimal,
        day: u32,
    ) -> stock_batch::Model {
        let cmd = ReceiveStockCommand {
            received_date: Some(day_of_2024(day)),
            ..ReceiveStockCommand::new(part_id, quantity, unit_price)
        };
        self.services
            .stock
            .receive_stock(cmd, UnitOfWork::Owned)
            .await
            .expect("failed to receive stock")
    }

    pub async fn receive_at(
        &self,
        part_id: i32,
        quantity: i32,
        unit_price: Decimal,
        day: u32,
        storage_location_id: i32,
    ) -> stock_batch::Model {
        let cmd = ReceiveStockCommand {
            received_date: Some(day_of_2024(day)),
            storage_location_id: Some(storage_location_id),
            ..ReceiveStockCommand::new(part_id, quantity, unit_price)
        };
        self.services
            .stock
            .receive_stock(cmd, UnitOfWork::Owned)
            .await
            .expect("failed to receive stock")
    }

    pub async fn on_hand(&self, part_id: i32) -> i32 {
        self.services
            .parts
            .get_inventory_level(part_id)
            .await
            .expect("inventory level should exist")
            .quantity_on_hand
    }

    /// Sets the aggregate level directly, the way stock looked before batch
    /// tracking existed.
    pub async fn seed_legacy_level(&self, part_id: i32, quantity: i32) {
        let level = inventory_level::Entity::find()
            .filter(inventory_level::Column::PartId.eq(part_id))
            .one(self.db.as_ref())
            .await
            .expect("query level")
            .expect("level exists");
        let mut active: inventory_level::ActiveModel = level.into();
        active.quantity_on_hand = Set(quantity);
        active.update(self.db.as_ref()).await.expect("update level");
    }

    /// Writes a location row without touching the aggregate level.
    pub async fn seed_location_row(&self, part_id: i32, storage_location_id: i32, quantity: i32) {
        part_location::ActiveModel {
            part_id: Set(part_id),
            storage_location_id: Set(storage_location_id),
            quantity: Set(quantity),
            assigned_date: Set(Utc::now()),
            last_movement_date: Set(Utc::now()),
            notes: Set(None),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("insert part location");
    }

    pub async fn batches(&self, part_id: i32) -> Vec<stock_batch::Model> {
        stock_batch::Entity::find()
            .filter(stock_batch::Column::PartId.eq(part_id))
            .order_by_asc(stock_batch::Column::Id)
            .all(self.db.as_ref())
            .await
            .expect("query batches")
    }

    pub async fn transactions(&self, part_id: i32) -> Vec<stock_transaction::Model> {
        stock_transaction::Entity::find()
            .filter(stock_transaction::Column::PartId.eq(part_id))
            .order_by_asc(stock_transaction::Column::Id)
            .all(self.db.as_ref())
            .await
            .expect("query transactions")
    }

    pub async fn location_quantity(&self, part_id: i32, storage_location_id: i32) -> Option<i32> {
        part_location::Entity::find()
            .filter(part_location::Column::PartId.eq(part_id))
            .filter(part_location::Column::StorageLocationId.eq(storage_location_id))
            .one(self.db.as_ref())
            .await
            .expect("query part location")
            .map(|row| row.quantity)
    }
}

pub fn day_of_2024(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0)
        .single()
        .expect("valid date")
        + chrono::Duration::days(i64::from(day))
}

/// Decimal comparison that ignores the scale SQLite round-trips leave behind.
pub fn assert_money_eq(actual: Decimal, expected: Decimal) {
    assert_eq!(
        actual.round_dp(4),
        expected.round_dp(4),
        "expected {} but got {}",
        expected,
        actual
    );
}
