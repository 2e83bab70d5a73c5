use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Aggregate on-hand quantity for a part. Exactly one row per part.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_levels")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub part_id: i32,
    pub quantity_on_hand: i32,
    pub quantity_reserved: i32,
    /// Legacy single-bin hint, superseded by `part_locations`.
    pub bin_location: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl Model {
    pub fn quantity_available(&self) -> i32 {
        (self.quantity_on_hand - self.quantity_reserved).max(0)
    }

    pub fn is_low_stock(&self, safety_stock: i32) -> bool {
        self.quantity_on_hand <= safety_stock
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::part::Entity",
        from = "Column::PartId",
        to = "super::part::Column::Id"
    )]
    Part,
}

impl Related<super::part::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Part.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
