use crate::entities::audit_log;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde_json::Value;
use tracing::warn;

pub const CATEGORY_INVENTORY: &str = "inventory";
pub const CATEGORY_WORKSHEET: &str = "worksheet";

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub category: &'static str,
    pub action_type: &'static str,
    pub entity_type: &'static str,
    pub entity_id: Option<i32>,
    pub user_id: Option<i32>,
    pub description: String,
    pub metadata: Option<Value>,
}

impl AuditEntry {
    pub fn inventory(
        action_type: &'static str,
        entity_type: &'static str,
        entity_id: i32,
        user_id: Option<i32>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            category: CATEGORY_INVENTORY,
            action_type,
            entity_type,
            entity_id: Some(entity_id),
            user_id,
            description: description.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Writes an audit row inside a savepoint of `txn`. A failure is logged and
/// swallowed so it can neither abort nor poison the stock mutation.
pub async fn record(txn: &DatabaseTransaction, entry: AuditEntry) {
    let action = entry.action_type;
    let entity_id = entry.entity_id;
    if let Err(e) = try_record(txn, entry).await {
        warn!(action, ?entity_id, error = %e, "Failed to write audit log entry");
    }
}

async fn try_record(txn: &DatabaseTransaction, entry: AuditEntry) -> Result<(), DbErr> {
    let savepoint = txn.begin().await?;
    audit_log::ActiveModel {
        category: Set(entry.category.to_string()),
        action_type: Set(entry.action_type.to_string()),
        entity_type: Set(entry.entity_type.to_string()),
        entity_id: Set(entry.entity_id),
        user_id: Set(entry.user_id),
        description: Set(entry.description),
        metadata: Set(entry.metadata.map(|m| m.to_string())),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(&savepoint)
    .await?;
    savepoint.commit().await
}

/// Audit trail for one entity, oldest first.
pub async fn entries_for<C: ConnectionTrait>(
    conn: &C,
    entity_type: &str,
    entity_id: i32,
) -> Result<Vec<audit_log::Model>, DbErr> {
    audit_log::Entity::find()
        .filter(audit_log::Column::EntityType.eq(entity_type))
        .filter(audit_log::Column::EntityId.eq(entity_id))
        .order_by_asc(audit_log::Column::Id)
        .all(conn)
        .await
}
