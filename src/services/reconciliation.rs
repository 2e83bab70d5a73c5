//! Detects and repairs drift between the aggregate inventory level and the
//! per-location quantities of a part.

use crate::{
    db::{settle, DbPool, UnitOfWork},
    entities::{
        inventory_level, part, part_location,
        stock_transaction::{self, TransactionType},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::audit::{self, AuditEntry},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, DbErr,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// `reference_type` of the ledger rows written by a level repair.
pub const REPAIR_REFERENCE: &str = "reconciliation";

/// Mismatch between `inventory_levels.quantity_on_hand` and the sum of the
/// part's `part_locations.quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Discrepancy {
    pub part_id: i32,
    pub part_name: String,
    pub inventory_level: i32,
    pub total_in_locations: i64,
    /// `inventory_level - total_in_locations`
    pub difference: i64,
}

impl From<&Discrepancy> for Event {
    fn from(d: &Discrepancy) -> Self {
        Event::DiscrepancyDetected {
            part_id: d.part_id,
            inventory_level: d.inventory_level,
            total_in_locations: d.total_in_locations,
            difference: d.difference,
        }
    }
}

/// Sums location quantities per part.
pub async fn location_totals<C: ConnectionTrait>(
    conn: &C,
    part_id: Option<i32>,
) -> Result<HashMap<i32, i64>, DbErr> {
    let mut query = part_location::Entity::find()
        .select_only()
        .column(part_location::Column::PartId)
        .column_as(Expr::col(part_location::Column::Quantity).sum(), "total")
        .group_by(part_location::Column::PartId);
    if let Some(part_id) = part_id {
        query = query.filter(part_location::Column::PartId.eq(part_id));
    }

    let rows: Vec<(i32, i64)> = query.into_tuple().all(conn).await?;
    Ok(rows.into_iter().collect())
}

/// Every part (or just `part_id`) whose level disagrees with its locations.
/// A part with a level but no location rows compares against zero.
pub async fn find_discrepancies<C: ConnectionTrait>(
    conn: &C,
    part_id: Option<i32>,
) -> Result<Vec<Discrepancy>, DbErr> {
    let mut query = inventory_level::Entity::find().find_also_related(part::Entity);
    if let Some(part_id) = part_id {
        query = query.filter(inventory_level::Column::PartId.eq(part_id));
    }
    let levels = query
        .order_by_asc(inventory_level::Column::PartId)
        .all(conn)
        .await?;
    let totals = location_totals(conn, part_id).await?;

    Ok(levels
        .into_iter()
        .filter_map(|(level, part)| {
            let part = part?;
            let total = totals.get(&level.part_id).copied().unwrap_or(0);
            let difference = i64::from(level.quantity_on_hand) - total;
            (difference != 0).then(|| Discrepancy {
                part_id: level.part_id,
                part_name: part.name,
                inventory_level: level.quantity_on_hand,
                total_in_locations: total,
                difference,
            })
        })
        .collect())
}

/// Post-mutation check for one part. Discrepancies are logged and returned
/// for the caller to publish, never raised; a failing check is only a
/// warning.
pub(crate) async fn check_part<C: ConnectionTrait>(conn: &C, part_id: i32) -> Option<Discrepancy> {
    match find_discrepancies(conn, Some(part_id)).await {
        Ok(found) => {
            let discrepancy = found.into_iter().next()?;
            warn!(
                part_id,
                inventory_level = discrepancy.inventory_level,
                total_in_locations = discrepancy.total_in_locations,
                "Inventory discrepancy detected after stock movement"
            );
            Some(discrepancy)
        }
        Err(e) => {
            warn!(part_id, error = %e, "Reconciliation check failed");
            None
        }
    }
}

#[derive(Clone)]
pub struct ReconciliationService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
}

impl ReconciliationService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Read-only comparison of levels against location totals.
    #[instrument(skip(self))]
    pub async fn validate_inventory_levels(
        &self,
        part_id: Option<i32>,
    ) -> Result<Vec<Discrepancy>, ServiceError> {
        let found = find_discrepancies(self.db_pool.as_ref(), part_id)
            .await
            .map_err(ServiceError::db_error)?;
        info!(count = found.len(), "Inventory level validation finished");
        Ok(found)
    }

    /// Overwrites the part's on-hand quantity with the sum of its locations
    /// and books the difference as an `adjustment` ledger row, so the ledger
    /// keeps summing to the level. Returns `false` when the part has no
    /// inventory level.
    #[instrument(skip(self, uow))]
    pub async fn fix_inventory_level_discrepancy(
        &self,
        part_id: i32,
        user_id: Option<i32>,
        uow: UnitOfWork<'_>,
    ) -> Result<bool, ServiceError> {
        let txn = uow
            .begin(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        let result = self.repair_in(&txn, part_id, user_id).await;
        let repaired = settle(txn, result).await?;

        match repaired {
            Some((old_quantity, new_quantity)) => {
                self.event_sender
                    .dispatch(
                        uow,
                        Event::InventoryLevelRepaired {
                            part_id,
                            old_quantity,
                            new_quantity,
                        },
                    )
                    .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn repair_in(
        &self,
        txn: &DatabaseTransaction,
        part_id: i32,
        user_id: Option<i32>,
    ) -> Result<Option<(i32, i32)>, ServiceError> {
        let level = inventory_level::Entity::find()
            .filter(inventory_level::Column::PartId.eq(part_id))
            .lock_exclusive()
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?;
        let Some(level) = level else {
            warn!(part_id, "No inventory level to repair");
            return Ok(None);
        };

        let total = location_totals(txn, Some(part_id))
            .await
            .map_err(ServiceError::db_error)?
            .get(&part_id)
            .copied()
            .unwrap_or(0);
        let new_quantity = i32::try_from(total).map_err(|_| {
            ServiceError::InternalError(format!(
                "Location total {} for part {} does not fit an inventory level",
                total, part_id
            ))
        })?;
        let old_quantity = level.quantity_on_hand;
        let delta = new_quantity.checked_sub(old_quantity).ok_or_else(|| {
            ServiceError::InternalError(format!(
                "Repair of part {} from {} to {} is out of range",
                part_id, old_quantity, new_quantity
            ))
        })?;

        let now = Utc::now();
        let mut active: inventory_level::ActiveModel = level.into();
        active.quantity_on_hand = Set(new_quantity);
        active.last_updated = Set(now);
        active.update(txn).await.map_err(ServiceError::db_error)?;

        let transaction_id = if delta != 0 {
            let adjustment = stock_transaction::ActiveModel {
                part_id: Set(part_id),
                transaction_type: Set(TransactionType::Adjustment.as_str().to_string()),
                quantity: Set(delta),
                reference_id: Set(None),
                reference_type: Set(Some(REPAIR_REFERENCE.to_string())),
                user_id: Set(user_id),
                notes: Set(Some(format!(
                    "Inventory level reconciled to location total {}",
                    new_quantity
                ))),
                timestamp: Set(now),
                ..Default::default()
            }
            .insert(txn)
            .await
            .map_err(ServiceError::db_error)?;
            Some(adjustment.id)
        } else {
            None
        };

        audit::record(
            txn,
            AuditEntry::inventory(
                "repair",
                "inventory_level",
                part_id,
                user_id,
                format!(
                    "Inventory level reset from {} to location total {}",
                    old_quantity, new_quantity
                ),
            )
            .with_metadata(json!({
                "old_quantity": old_quantity,
                "new_quantity": new_quantity,
                "transaction_id": transaction_id,
            })),
        )
        .await;

        info!(part_id, old_quantity, new_quantity, "Inventory level repaired");
        Ok(Some((old_quantity, new_quantity)))
    }
}
