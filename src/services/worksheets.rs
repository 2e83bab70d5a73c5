use crate::{
    db::{settle, DbPool, UnitOfWork},
    entities::{stock_transaction::TransactionType, worksheet, worksheet_part},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        audit::{self, AuditEntry},
        stock::{fifo_cost_on, find_part, issue_in, IssueOutcome, IssueStockCommand, StockService},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};

pub const WORKSHEET_REFERENCE: &str = "worksheet";

/// Part consumed on a worksheet.
#[derive(Debug, Clone)]
pub struct AddWorksheetPart {
    pub worksheet_id: i32,
    pub part_id: i32,
    /// Units used; positive.
    pub quantity: i32,
    /// Explicit cost per unit. Defaults to the FIFO cost of the units taken.
    pub unit_cost: Option<Decimal>,
    pub notes: Option<String>,
    pub user_id: Option<i32>,
    pub storage_location_id: Option<i32>,
}

impl AddWorksheetPart {
    pub fn new(worksheet_id: i32, part_id: i32, quantity: i32) -> Self {
        Self {
            worksheet_id,
            part_id,
            quantity,
            unit_cost: None,
            notes: None,
            user_id: None,
            storage_location_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorksheetUsage {
    pub worksheet_part: worksheet_part::Model,
    pub issue: IssueOutcome,
}

#[derive(Clone)]
pub struct WorksheetService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    stock: StockService,
}

impl WorksheetService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, stock: StockService) -> Self {
        Self {
            db_pool,
            event_sender,
            stock,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_worksheet(
        &self,
        machine_id: i32,
        title: &str,
        assigned_to_user_id: Option<i32>,
    ) -> Result<worksheet::Model, ServiceError> {
        if title.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Worksheet title must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let created = worksheet::ActiveModel {
            machine_id: Set(machine_id),
            title: Set(title.to_string()),
            status: Set(worksheet::STATUS_OPEN.to_string()),
            assigned_to_user_id: Set(assigned_to_user_id),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(self.db_pool.as_ref())
        .await
        .map_err(ServiceError::db_error)?;

        info!(worksheet_id = created.id, machine_id, "Worksheet created");
        Ok(created)
    }

    pub async fn get_worksheet(&self, worksheet_id: i32) -> Result<worksheet::Model, ServiceError> {
        worksheet::Entity::find_by_id(worksheet_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Worksheet {} not found", worksheet_id)))
    }

    /// Records part usage on a worksheet and issues the stock for it as one
    /// unit of work. If the issuance fails nothing is recorded.
    #[instrument(skip(self, uow), fields(worksheet_id = input.worksheet_id, part_id = input.part_id))]
    pub async fn add_part_to_worksheet(
        &self,
        input: AddWorksheetPart,
        uow: UnitOfWork<'_>,
    ) -> Result<WorksheetUsage, ServiceError> {
        if input.quantity <= 0 {
            return Err(ServiceError::invalid_quantity(
                input.quantity,
                "quantity used must be positive",
            ));
        }

        let cmd = IssueStockCommand {
            transaction_type: TransactionType::Issued,
            reference_type: Some(WORKSHEET_REFERENCE.to_string()),
            reference_id: Some(input.worksheet_id),
            user_id: input.user_id,
            notes: input.notes.clone(),
            storage_location_id: input.storage_location_id,
            ..IssueStockCommand::new(input.part_id, -input.quantity)
        };

        let txn = uow
            .begin(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        let result = self.add_part_in(&txn, &input, &cmd).await;
        let (worksheet_part, outcome) = settle(txn, result).await?;

        let issue = self.stock.after_issue(&cmd, outcome, uow).await;
        self.event_sender
            .dispatch(
                uow,
                Event::WorksheetPartAdded {
                    worksheet_id: input.worksheet_id,
                    part_id: input.part_id,
                    quantity: input.quantity,
                    unit_cost: worksheet_part.unit_cost_at_time,
                },
            )
            .await;
        info!(
            worksheet_part_id = worksheet_part.id,
            quantity = input.quantity,
            unit_cost = %worksheet_part.unit_cost_at_time,
            "Part added to worksheet"
        );

        Ok(WorksheetUsage {
            worksheet_part,
            issue,
        })
    }

    async fn add_part_in(
        &self,
        txn: &DatabaseTransaction,
        input: &AddWorksheetPart,
        cmd: &IssueStockCommand,
    ) -> Result<(worksheet_part::Model, IssueOutcome), ServiceError> {
        worksheet::Entity::find_by_id(input.worksheet_id)
            .lock_exclusive()
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Worksheet {} not found", input.worksheet_id))
            })?;
        let part = find_part(txn, input.part_id).await?;

        // Costed before the issuance consumes the batches.
        let unit_cost = match input.unit_cost {
            Some(cost) => cost,
            None => {
                let fifo = fifo_cost_on(txn, input.part_id, input.quantity).await?;
                if fifo.is_zero() {
                    part.buy_price
                } else {
                    fifo
                }
            }
        };
        if unit_cost.is_sign_negative() {
            return Err(ServiceError::ValidationError(format!(
                "Unit cost must not be negative (got {})",
                unit_cost
            )));
        }

        let outcome = issue_in(txn, cmd, self.stock.settings()).await?;

        let row = worksheet_part::ActiveModel {
            worksheet_id: Set(input.worksheet_id),
            part_id: Set(input.part_id),
            stock_transaction_id: Set(Some(outcome.transaction.id)),
            quantity_used: Set(input.quantity),
            unit_cost_at_time: Set(unit_cost),
            notes: Set(input.notes.clone()),
            added_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        audit::record(
            txn,
            AuditEntry {
                category: audit::CATEGORY_WORKSHEET,
                action_type: "add_part",
                entity_type: "worksheet",
                entity_id: Some(input.worksheet_id),
                user_id: input.user_id,
                description: format!(
                    "{} x {} added to worksheet {}",
                    input.quantity, part.name, input.worksheet_id
                ),
                metadata: Some(json!({
                    "part_id": input.part_id,
                    "worksheet_part_id": row.id,
                    "stock_transaction_id": outcome.transaction.id,
                    "unit_cost": unit_cost,
                })),
            },
        )
        .await;

        Ok((row, outcome))
    }

    pub async fn list_worksheet_parts(
        &self,
        worksheet_id: i32,
    ) -> Result<Vec<worksheet_part::Model>, ServiceError> {
        worksheet_part::Entity::find()
            .filter(worksheet_part::Column::WorksheetId.eq(worksheet_id))
            .order_by_asc(worksheet_part::Column::Id)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Total cost of the parts used on a worksheet.
    pub async fn worksheet_parts_cost(&self, worksheet_id: i32) -> Result<Decimal, ServiceError> {
        Ok(self
            .list_worksheet_parts(worksheet_id)
            .await?
            .iter()
            .map(worksheet_part::Model::line_cost)
            .sum())
    }
}
