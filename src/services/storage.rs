use crate::{
    db::{settle, DbPool, UnitOfWork},
    entities::{inventory_level, part, part_location, storage_location},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        audit::{self, AuditEntry},
        reconciliation::{self, location_totals},
        stock::{add_to_location, find_part},
    },
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

#[derive(Debug, Clone, Validate)]
pub struct NewStorageLocation {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 50))]
    pub code: Option<String>,
    pub parent_id: Option<i32>,
    #[validate(length(max = 50))]
    pub location_type: Option<String>,
    pub description: Option<String>,
}

impl NewStorageLocation {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: None,
            parent_id: None,
            location_type: None,
            description: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssignPartCommand {
    pub part_id: i32,
    pub storage_location_id: i32,
    pub quantity: i32,
    pub notes: Option<String>,
    pub user_id: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct TransferPartCommand {
    pub part_location_id: i32,
    pub target_location_id: i32,
    /// Defaults to everything held at the source.
    pub quantity: Option<i32>,
    pub notes: Option<String>,
    pub user_id: Option<i32>,
}

/// Storage locations and the assignment of stock to them. Moving stock
/// between locations never changes the aggregate level.
#[derive(Clone)]
pub struct StorageService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl StorageService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_storage_location(
        &self,
        input: NewStorageLocation,
    ) -> Result<storage_location::Model, ServiceError> {
        input.validate()?;
        let db = self.db_pool.as_ref();

        if let Some(parent_id) = input.parent_id {
            storage_location::Entity::find_by_id(parent_id)
                .one(db)
                .await
                .map_err(ServiceError::db_error)?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Parent location {} not found", parent_id))
                })?;
        }

        let location = storage_location::ActiveModel {
            name: Set(input.name),
            code: Set(input.code),
            parent_id: Set(input.parent_id),
            location_type: Set(input.location_type),
            description: Set(input.description),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(location_id = location.id, "Storage location created");
        Ok(location)
    }

    /// Places `quantity` units of a part at a location, merging into an
    /// existing row. A location holds a single part, and the total assigned
    /// across locations may not exceed the part's on-hand quantity.
    #[instrument(skip(self, uow))]
    pub async fn assign_part_to_location(
        &self,
        cmd: AssignPartCommand,
        uow: UnitOfWork<'_>,
    ) -> Result<part_location::Model, ServiceError> {
        let txn = uow
            .begin(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        let result = assign_in(&txn, &cmd).await;
        let row = settle(txn, result).await?;

        let discrepancy = match uow {
            UnitOfWork::Owned => reconciliation::check_part(self.db_pool.as_ref(), cmd.part_id).await,
            UnitOfWork::Joined(parent, _) => reconciliation::check_part(parent, cmd.part_id).await,
        };
        if let Some(discrepancy) = &discrepancy {
            self.event_sender
                .dispatch(uow, Event::from(discrepancy))
                .await;
        }
        Ok(row)
    }

    /// Moves stock from one location row to another location. Returns the
    /// target row.
    #[instrument(skip(self, uow))]
    pub async fn transfer_part_location(
        &self,
        cmd: TransferPartCommand,
        uow: UnitOfWork<'_>,
    ) -> Result<part_location::Model, ServiceError> {
        let txn = uow
            .begin(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        let result = transfer_in(&txn, &cmd).await;
        settle(txn, result).await
    }

    pub async fn get_part_locations(
        &self,
        part_id: i32,
    ) -> Result<Vec<(part_location::Model, Option<storage_location::Model>)>, ServiceError> {
        part_location::Entity::find()
            .filter(part_location::Column::PartId.eq(part_id))
            .find_also_related(storage_location::Entity)
            .order_by_asc(part_location::Column::Id)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn get_parts_at_location(
        &self,
        storage_location_id: i32,
    ) -> Result<Vec<(part_location::Model, Option<part::Model>)>, ServiceError> {
        part_location::Entity::find()
            .filter(part_location::Column::StorageLocationId.eq(storage_location_id))
            .find_also_related(part::Entity)
            .order_by_asc(part_location::Column::Id)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }
}

async fn find_location(
    txn: &DatabaseTransaction,
    storage_location_id: i32,
) -> Result<storage_location::Model, ServiceError> {
    storage_location::Entity::find_by_id(storage_location_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Storage location {} not found", storage_location_id))
        })
}

/// Rejects placing `part_id` at a location already holding another part.
async fn ensure_single_sku(
    txn: &DatabaseTransaction,
    storage_location_id: i32,
    part_id: i32,
) -> Result<(), ServiceError> {
    let occupant = part_location::Entity::find()
        .filter(part_location::Column::StorageLocationId.eq(storage_location_id))
        .filter(part_location::Column::PartId.ne(part_id))
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?;

    match occupant {
        Some(other) => Err(ServiceError::ValidationError(format!(
            "Storage location {} already holds part {}",
            storage_location_id, other.part_id
        ))),
        None => Ok(()),
    }
}

async fn assign_in(
    txn: &DatabaseTransaction,
    cmd: &AssignPartCommand,
) -> Result<part_location::Model, ServiceError> {
    if cmd.quantity <= 0 {
        return Err(ServiceError::invalid_quantity(
            cmd.quantity,
            "assigned quantity must be positive",
        ));
    }
    find_location(txn, cmd.storage_location_id).await?;
    find_part(txn, cmd.part_id).await?;
    ensure_single_sku(txn, cmd.storage_location_id, cmd.part_id).await?;

    let level = inventory_level::Entity::find()
        .filter(inventory_level::Column::PartId.eq(cmd.part_id))
        .lock_exclusive()
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or(ServiceError::InventoryLevelNotFound(cmd.part_id))?;

    let assigned = location_totals(txn, Some(cmd.part_id))
        .await
        .map_err(ServiceError::db_error)?
        .get(&cmd.part_id)
        .copied()
        .unwrap_or(0);
    if assigned + i64::from(cmd.quantity) > i64::from(level.quantity_on_hand) {
        return Err(ServiceError::ValidationError(format!(
            "Cannot assign {} units of part {}: {} already assigned of {} on hand",
            cmd.quantity, cmd.part_id, assigned, level.quantity_on_hand
        )));
    }

    let now = Utc::now();
    let row = add_to_location(txn, cmd.part_id, cmd.storage_location_id, cmd.quantity, now).await?;
    let row = match &cmd.notes {
        Some(notes) => {
            let mut active: part_location::ActiveModel = row.into();
            active.notes = Set(Some(notes.clone()));
            active.update(txn).await.map_err(ServiceError::db_error)?
        }
        None => row,
    };

    audit::record(
        txn,
        AuditEntry::inventory(
            "assign_location",
            "part_location",
            row.id,
            cmd.user_id,
            format!(
                "Assigned {} units of part {} to location {}",
                cmd.quantity, cmd.part_id, cmd.storage_location_id
            ),
        ),
    )
    .await;

    Ok(row)
}

async fn transfer_in(
    txn: &DatabaseTransaction,
    cmd: &TransferPartCommand,
) -> Result<part_location::Model, ServiceError> {
    let source = part_location::Entity::find_by_id(cmd.part_location_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Part location {} not found", cmd.part_location_id))
        })?;
    find_location(txn, cmd.target_location_id).await?;

    let now = Utc::now();
    if source.storage_location_id == cmd.target_location_id {
        let mut active: part_location::ActiveModel = source.into();
        active.last_movement_date = Set(now);
        return active.update(txn).await.map_err(ServiceError::db_error);
    }

    let quantity = cmd.quantity.unwrap_or(source.quantity);
    if quantity <= 0 {
        return Err(ServiceError::invalid_quantity(
            quantity,
            "transfer quantity must be positive",
        ));
    }
    if quantity > source.quantity {
        return Err(ServiceError::InsufficientStock {
            part_id: source.part_id,
            requested: quantity,
            available: source.quantity,
        });
    }
    ensure_single_sku(txn, cmd.target_location_id, source.part_id).await?;

    let part_id = source.part_id;
    let from_location = source.storage_location_id;
    let target = add_to_location(txn, part_id, cmd.target_location_id, quantity, now).await?;
    let target = match &cmd.notes {
        Some(notes) => {
            let mut active: part_location::ActiveModel = target.into();
            active.notes = Set(Some(notes.clone()));
            active.update(txn).await.map_err(ServiceError::db_error)?
        }
        None => target,
    };

    let left = source.quantity - quantity;
    if left == 0 {
        source.delete(txn).await.map_err(ServiceError::db_error)?;
    } else {
        let mut active: part_location::ActiveModel = source.into();
        active.quantity = Set(left);
        active.last_movement_date = Set(now);
        active.update(txn).await.map_err(ServiceError::db_error)?;
    }

    audit::record(
        txn,
        AuditEntry::inventory(
            "transfer_location",
            "part_location",
            target.id,
            cmd.user_id,
            format!(
                "Moved {} units of part {} from location {} to {}",
                quantity, part_id, from_location, cmd.target_location_id
            ),
        )
        .with_metadata(json!({ "from": from_location, "to": cmd.target_location_id })),
    )
    .await;

    info!(
        part_id,
        from_location,
        to_location = cmd.target_location_id,
        quantity,
        "Stock moved between locations"
    );
    Ok(target)
}
