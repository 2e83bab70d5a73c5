use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Append-only ledger entry. Receipts carry a positive quantity, issuances a
/// negative one; rows are never updated or deleted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_transactions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub part_id: i32,
    pub transaction_type: String,
    pub quantity: i32,
    pub reference_id: Option<i32>,
    pub reference_type: Option<String>,
    pub user_id: Option<i32>,
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Model {
    pub fn kind(&self) -> Option<TransactionType> {
        self.transaction_type.parse().ok()
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

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionType {
    Received,
    Issued,
    InitialStock,
    Adjustment,
}

impl TransactionType {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_type_round_trips_through_column_text() {
        assert_eq!(TransactionType::InitialStock.as_str(), "initial_stock");
        assert_eq!(
            "issued".parse::<TransactionType>().ok(),
            Some(TransactionType::Issued)
        );
        assert!("returned".parse::<TransactionType>().is_err());
    }
}
