use crate::{
    db::{settle, DbPool, UnitOfWork},
    entities::{inventory_level, part, part_location, stock_transaction, supplier},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        audit::{self, AuditEntry},
        stock::{receive_in, ReceiveStockCommand},
    },
};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, ModelTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

pub static SKU_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{2,50}$").expect("SKU pattern is a valid regex"));

#[derive(Debug, Clone, Validate)]
pub struct NewSupplier {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub contact_person: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Validate)]
pub struct NewPart {
    #[validate(regex = "SKU_PATTERN")]
    pub sku: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub description: Option<String>,
    #[validate(length(max = 50))]
    pub category: Option<String>,
    pub unit: Option<String>,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    #[validate(range(min = 0))]
    pub safety_stock: i32,
    #[validate(range(min = 0))]
    pub reorder_quantity: i32,
    pub supplier_id: Option<i32>,
    /// Booked as a regular receipt at the buy price so it gets a FIFO batch.
    #[validate(range(min = 0))]
    pub initial_quantity: i32,
    pub initial_location_id: Option<i32>,
    pub user_id: Option<i32>,
}

impl NewPart {
    pub fn new(sku: impl Into<String>, name: impl Into<String>, buy_price: Decimal) -> Self {
        Self {
            sku: sku.into(),
            name: name.into(),
            description: None,
            category: None,
            unit: None,
            buy_price,
            sell_price: Decimal::ZERO,
            safety_stock: 0,
            reorder_quantity: 0,
            supplier_id: None,
            initial_quantity: 0,
            initial_location_id: None,
            user_id: None,
        }
    }
}

/// Partial update. `None` leaves a field untouched; the nested options clear
/// nullable fields.
#[derive(Debug, Clone, Default)]
pub struct PartChanges {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub unit: Option<String>,
    pub buy_price: Option<Decimal>,
    pub sell_price: Option<Decimal>,
    pub safety_stock: Option<i32>,
    pub reorder_quantity: Option<i32>,
    pub supplier_id: Option<Option<i32>>,
    pub bin_location: Option<Option<String>>,
    pub change_reason: Option<String>,
}

fn check_prices(buy_price: Option<Decimal>, sell_price: Option<Decimal>) -> Result<(), ServiceError> {
    for price in [buy_price, sell_price].into_iter().flatten() {
        if price.is_sign_negative() {
            return Err(ServiceError::ValidationError(format!(
                "Prices must not be negative (got {})",
                price
            )));
        }
    }
    Ok(())
}

async fn ensure_supplier(txn: &DatabaseTransaction, supplier_id: i32) -> Result<(), ServiceError> {
    supplier::Entity::find_by_id(supplier_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .map(|_| ())
        .ok_or_else(|| ServiceError::NotFound(format!("Supplier {} not found", supplier_id)))
}

/// Part catalogue: suppliers, parts and their inventory levels.
#[derive(Clone)]
pub struct PartsService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl PartsService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_supplier(&self, input: NewSupplier) -> Result<supplier::Model, ServiceError> {
        input.validate()?;
        let db = self.db_pool.as_ref();

        let exists = supplier::Entity::find()
            .filter(supplier::Column::Name.eq(input.name.as_str()))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;
        if exists.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Supplier '{}' already exists",
                input.name
            )));
        }

        let created = supplier::ActiveModel {
            name: Set(input.name),
            contact_person: Set(input.contact_person),
            email: Set(input.email),
            phone: Set(input.phone),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(supplier_id = created.id, "Supplier created");
        Ok(created)
    }

    /// Creates a part together with its inventory level.
    #[instrument(skip(self, uow))]
    pub async fn create_part(
        &self,
        input: NewPart,
        uow: UnitOfWork<'_>,
    ) -> Result<part::Model, ServiceError> {
        input.validate()?;
        check_prices(Some(input.buy_price), Some(input.sell_price))?;

        let txn = uow
            .begin(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        let result = create_part_in(&txn, &input).await;
        let (created, initial_batch) = settle(txn, result).await?;

        info!(part_id = created.id, sku = %created.sku, "Part created");
        if let Some(batch) = &initial_batch {
            self.event_sender.dispatch(uow, Event::from(batch)).await;
        }
        Ok(created)
    }

    /// Updates catalogue data. Changed fields are written to the audit log.
    #[instrument(skip(self))]
    pub async fn update_part(
        &self,
        part_id: i32,
        changes: PartChanges,
        user_id: Option<i32>,
    ) -> Result<part::Model, ServiceError> {
        check_prices(changes.buy_price, changes.sell_price)?;
        if let Some(name) = &changes.name {
            if name.trim().is_empty() || name.len() > 100 {
                return Err(ServiceError::ValidationError(
                    "Part name must be 1 to 100 characters".to_string(),
                ));
            }
        }
        if changes.safety_stock.map_or(false, |v| v < 0)
            || changes.reorder_quantity.map_or(false, |v| v < 0)
        {
            return Err(ServiceError::ValidationError(
                "Stock thresholds must not be negative".to_string(),
            ));
        }

        self.db_pool
            .transaction::<_, part::Model, ServiceError>(|txn| {
                Box::pin(async move {
                    let current = part::Entity::find_by_id(part_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or(ServiceError::PartNotFound(part_id))?;
                    if let Some(Some(supplier_id)) = changes.supplier_id {
                        ensure_supplier(txn, supplier_id).await?;
                    }

                    let mut diff = Map::new();
                    let mut active: part::ActiveModel = current.clone().into();
                    macro_rules! apply {
                        ($field:ident) => {
                            if let Some(value) = changes.$field.clone() {
                                if current.$field != value {
                                    diff.insert(
                                        stringify!($field).to_string(),
                                        json!({ "old": current.$field, "new": value }),
                                    );
                                    active.$field = Set(value);
                                }
                            }
                        };
                    }
                    apply!(name);
                    apply!(description);
                    apply!(category);
                    apply!(unit);
                    apply!(buy_price);
                    apply!(sell_price);
                    apply!(safety_stock);
                    apply!(reorder_quantity);
                    apply!(supplier_id);

                    let updated = if diff.is_empty() {
                        current
                    } else {
                        active.updated_at = Set(Utc::now());
                        active.update(txn).await.map_err(ServiceError::db_error)?
                    };

                    if let Some(bin_location) = changes.bin_location.clone() {
                        let level = inventory_level::Entity::find()
                            .filter(inventory_level::Column::PartId.eq(part_id))
                            .lock_exclusive()
                            .one(txn)
                            .await
                            .map_err(ServiceError::db_error)?
                            .ok_or(ServiceError::InventoryLevelNotFound(part_id))?;
                        if level.bin_location != bin_location {
                            diff.insert(
                                "bin_location".to_string(),
                                json!({ "old": level.bin_location, "new": bin_location }),
                            );
                            let mut active_level: inventory_level::ActiveModel = level.into();
                            active_level.bin_location = Set(bin_location);
                            active_level.last_updated = Set(Utc::now());
                            active_level
                                .update(txn)
                                .await
                                .map_err(ServiceError::db_error)?;
                        }
                    }

                    if !diff.is_empty() {
                        let mut metadata = Map::new();
                        metadata.insert("changes".to_string(), Value::Object(diff));
                        if let Some(reason) = &changes.change_reason {
                            metadata.insert("reason".to_string(), json!(reason));
                        }
                        audit::record(
                            txn,
                            AuditEntry::inventory(
                                "update",
                                "part",
                                part_id,
                                user_id,
                                format!("Part {} updated", updated.sku),
                            )
                            .with_metadata(Value::Object(metadata)),
                        )
                        .await;
                    }

                    Ok(updated)
                })
            })
            .await
            .map_err(ServiceError::from)
    }

    /// Removes a part that never moved stock. Parts with ledger history are
    /// kept for traceability.
    #[instrument(skip(self))]
    pub async fn delete_part(&self, part_id: i32, user_id: Option<i32>) -> Result<(), ServiceError> {
        self.db_pool
            .transaction::<_, (), ServiceError>(|txn| {
                Box::pin(async move {
                    let existing = part::Entity::find_by_id(part_id)
                        .one(txn)
                        .await
                        .map_err(ServiceError::db_error)?
                        .ok_or(ServiceError::PartNotFound(part_id))?;

                    let history = stock_transaction::Entity::find()
                        .filter(stock_transaction::Column::PartId.eq(part_id))
                        .count(txn)
                        .await
                        .map_err(ServiceError::db_error)?;
                    if history > 0 {
                        return Err(ServiceError::Conflict(format!(
                            "Part {} has {} stock transactions and cannot be deleted",
                            part_id, history
                        )));
                    }

                    part_location::Entity::delete_many()
                        .filter(part_location::Column::PartId.eq(part_id))
                        .exec(txn)
                        .await
                        .map_err(ServiceError::db_error)?;
                    inventory_level::Entity::delete_many()
                        .filter(inventory_level::Column::PartId.eq(part_id))
                        .exec(txn)
                        .await
                        .map_err(ServiceError::db_error)?;
                    let sku = existing.sku.clone();
                    existing.delete(txn).await.map_err(ServiceError::db_error)?;

                    audit::record(
                        txn,
                        AuditEntry::inventory(
                            "delete",
                            "part",
                            part_id,
                            user_id,
                            format!("Part {} deleted", sku),
                        ),
                    )
                    .await;
                    Ok(())
                })
            })
            .await
            .map_err(ServiceError::from)?;

        info!(part_id, "Part deleted");
        Ok(())
    }

    pub async fn get_part(&self, part_id: i32) -> Result<part::Model, ServiceError> {
        part::Entity::find_by_id(part_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or(ServiceError::PartNotFound(part_id))
    }

    pub async fn get_part_by_sku(&self, sku: &str) -> Result<Option<part::Model>, ServiceError> {
        part::Entity::find()
            .filter(part::Column::Sku.eq(sku))
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Parts ordered by name, each with its inventory level.
    pub async fn list_parts(
        &self,
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<(part::Model, Option<inventory_level::Model>)>, ServiceError> {
        let mut query = part::Entity::find()
            .find_also_related(inventory_level::Entity)
            .order_by_asc(part::Column::Name)
            .order_by_asc(part::Column::Id);
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        if offset > 0 {
            query = query.offset(offset);
        }
        query
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn count_parts(&self) -> Result<u64, ServiceError> {
        part::Entity::find()
            .count(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn get_inventory_level(
        &self,
        part_id: i32,
    ) -> Result<inventory_level::Model, ServiceError> {
        inventory_level::Entity::find()
            .filter(inventory_level::Column::PartId.eq(part_id))
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or(ServiceError::InventoryLevelNotFound(part_id))
    }

    /// Levels for many parts in one query, keyed by part id.
    pub async fn get_inventory_levels(
        &self,
        part_ids: &[i32],
    ) -> Result<HashMap<i32, inventory_level::Model>, ServiceError> {
        if part_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let levels = inventory_level::Entity::find()
            .filter(inventory_level::Column::PartId.is_in(part_ids.iter().copied()))
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        Ok(levels.into_iter().map(|l| (l.part_id, l)).collect())
    }

    /// Parts at or below their safety stock.
    pub async fn low_stock_parts(
        &self,
    ) -> Result<Vec<(part::Model, inventory_level::Model)>, ServiceError> {
        let rows = part::Entity::find()
            .find_also_related(inventory_level::Entity)
            .order_by_asc(part::Column::Name)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        Ok(rows
            .into_iter()
            .filter_map(|(p, level)| level.map(|l| (p, l)))
            .filter(|(p, l)| l.is_low_stock(p.safety_stock))
            .collect())
    }
}

async fn create_part_in(
    txn: &DatabaseTransaction,
    input: &NewPart,
) -> Result<(part::Model, Option<crate::entities::stock_batch::Model>), ServiceError> {
    let duplicate = part::Entity::find()
        .filter(part::Column::Sku.eq(input.sku.as_str()))
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?;
    if duplicate.is_some() {
        return Err(ServiceError::Conflict(format!(
            "SKU '{}' already exists",
            input.sku
        )));
    }
    if let Some(supplier_id) = input.supplier_id {
        ensure_supplier(txn, supplier_id).await?;
    }

    let now = Utc::now();
    let created = part::ActiveModel {
        sku: Set(input.sku.clone()),
        name: Set(input.name.clone()),
        description: Set(input.description.clone()),
        category: Set(input.category.clone()),
        unit: Set(input
            .unit
            .clone()
            .unwrap_or_else(|| part::DEFAULT_UNIT.to_string())),
        buy_price: Set(input.buy_price),
        sell_price: Set(input.sell_price),
        safety_stock: Set(input.safety_stock),
        reorder_quantity: Set(input.reorder_quantity),
        supplier_id: Set(input.supplier_id),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    inventory_level::ActiveModel {
        part_id: Set(created.id),
        quantity_on_hand: Set(0),
        quantity_reserved: Set(0),
        bin_location: Set(None),
        last_updated: Set(now),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    audit::record(
        txn,
        AuditEntry::inventory(
            "create",
            "part",
            created.id,
            input.user_id,
            format!("Part {} created", created.sku),
        ),
    )
    .await;

    let initial_batch = if input.initial_quantity > 0 {
        let receipt = ReceiveStockCommand {
            supplier_id: input.supplier_id,
            storage_location_id: input.initial_location_id,
            user_id: input.user_id,
            notes: Some("Initial stock".to_string()),
            ..ReceiveStockCommand::new(created.id, input.initial_quantity, input.buy_price)
        };
        let (_, batch) = receive_in(txn, &receipt).await?;
        Some(batch)
    } else {
        None
    };

    Ok((created, initial_batch))
}
