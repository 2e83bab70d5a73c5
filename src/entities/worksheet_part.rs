use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "worksheet_parts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub worksheet_id: i32,
    pub part_id: i32,
    pub stock_transaction_id: Option<i32>,
    pub quantity_used: i32,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub unit_cost_at_time: Decimal,
    pub notes: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl Model {
    pub fn line_cost(&self) -> Decimal {
        Decimal::from(self.quantity_used) * self.unit_cost_at_time
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::worksheet::Entity",
        from = "Column::WorksheetId",
        to = "super::worksheet::Column::Id"
    )]
    Worksheet,
    #[sea_orm(
        belongs_to = "super::part::Entity",
        from = "Column::PartId",
        to = "super::part::Column::Id"
    )]
    Part,
}

impl Related<super::worksheet::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Worksheet.def()
    }
}

impl Related<super::part::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Part.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
