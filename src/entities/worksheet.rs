use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const STATUS_OPEN: &str = "open";

/// Work order raised against a machine. Parts consumed on it are recorded as
/// `worksheet_parts`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "worksheets")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub machine_id: i32,
    pub title: String,
    pub status: String,
    pub assigned_to_user_id: Option<i32>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::worksheet_part::Entity")]
    WorksheetParts,
}

impl Related<super::worksheet_part::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WorksheetParts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
