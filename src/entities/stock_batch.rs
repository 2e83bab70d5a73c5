use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// FIFO cost lot. `quantity_remaining` only ever decreases and exhausted
/// batches are kept for history.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_batches")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub part_id: i32,
    pub quantity: i32,
    pub quantity_remaining: i32,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub unit_price: Decimal,
    pub received_date: DateTime<Utc>,
    pub supplier_id: Option<i32>,
    pub invoice_number: Option<String>,
    pub notes: Option<String>,
    pub stock_transaction_id: Option<i32>,
    pub storage_location_id: Option<i32>,
}

impl Model {
    pub fn is_exhausted(&self) -> bool {
        self.quantity_remaining == 0
    }

    /// Value of the stock still left in this lot.
    pub fn remaining_value(&self) -> Decimal {
        Decimal::from(self.quantity_remaining) * self.unit_price
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
    #[sea_orm(
        belongs_to = "super::stock_transaction::Entity",
        from = "Column::StockTransactionId",
        to = "super::stock_transaction::Column::Id"
    )]
    StockTransaction,
    #[sea_orm(
        belongs_to = "super::storage_location::Entity",
        from = "Column::StorageLocationId",
        to = "super::storage_location::Column::Id"
    )]
    StorageLocation,
}

impl Related<super::part::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Part.def()
    }
}

impl Related<super::stock_transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StockTransaction.def()
    }
}

impl Related<super::storage_location::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StorageLocation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
