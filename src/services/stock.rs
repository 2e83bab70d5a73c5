//! Stock engine: receipts, FIFO issuance, costing previews and the legacy
//! batch backfill.
//!
//! Every mutation locks the part's `inventory_levels` row first. That row is
//! the per-part serialization point, so two issuances of the same part never
//! interleave while different parts proceed independently.

use crate::{
    config::StockConfig,
    db::{settle, DbPool, UnitOfWork},
    entities::{
        inventory_level, part, part_location, stock_batch,
        stock_transaction::{self, TransactionType},
        storage_location, supplier,
    },
    errors::ServiceError,
    events::{DriftReason, Event, EventSender},
    services::{
        audit::{self, AuditEntry},
        fifo::{self, BatchConsumption, BatchSlice},
        reconciliation::{self, Discrepancy},
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const BACKFILL_NOTE: &str = "Migrated from existing inventory";

#[derive(Debug, Clone)]
pub struct ReceiveStockCommand {
    pub part_id: i32,
    pub quantity: i32,
    pub unit_price: Decimal,
    /// Defaults to now. Also used as the batch's FIFO ordering key.
    pub received_date: Option<DateTime<Utc>>,
    pub supplier_id: Option<i32>,
    pub invoice_number: Option<String>,
    pub notes: Option<String>,
    pub user_id: Option<i32>,
    pub storage_location_id: Option<i32>,
}

impl ReceiveStockCommand {
    pub fn new(part_id: i32, quantity: i32, unit_price: Decimal) -> Self {
        Self {
            part_id,
            quantity,
            unit_price,
            received_date: None,
            supplier_id: None,
            invoice_number: None,
            notes: None,
            user_id: None,
            storage_location_id: None,
        }
    }
}

/// Removal of stock. `quantity` is negative; its magnitude is the number of
/// units removed.
#[derive(Debug, Clone)]
pub struct IssueStockCommand {
    pub part_id: i32,
    pub quantity: i32,
    pub transaction_type: TransactionType,
    pub reference_type: Option<String>,
    pub reference_id: Option<i32>,
    pub user_id: Option<i32>,
    pub notes: Option<String>,
    pub storage_location_id: Option<i32>,
}

impl IssueStockCommand {
    pub fn new(part_id: i32, quantity: i32) -> Self {
        Self {
            part_id,
            quantity,
            transaction_type: TransactionType::Issued,
            reference_type: None,
            reference_id: None,
            user_id: None,
            notes: None,
            storage_location_id: None,
        }
    }
}

/// Signed stock change: positive quantities are received at the part's buy
/// price, negative ones are issued.
#[derive(Debug, Clone)]
pub struct AdjustStockCommand {
    pub part_id: i32,
    pub quantity: i32,
    /// Ledger type for the issuance side. Receipts are always `received`.
    pub transaction_type: TransactionType,
    pub reference_type: Option<String>,
    pub reference_id: Option<i32>,
    pub user_id: Option<i32>,
    pub notes: Option<String>,
    pub storage_location_id: Option<i32>,
}

impl AdjustStockCommand {
    pub fn new(part_id: i32, quantity: i32) -> Self {
        Self {
            part_id,
            quantity,
            transaction_type: TransactionType::Adjustment,
            reference_type: None,
            reference_id: None,
            user_id: None,
            notes: None,
            storage_location_id: None,
        }
    }
}

impl From<&AdjustStockCommand> for IssueStockCommand {
    fn from(cmd: &AdjustStockCommand) -> Self {
        Self {
            part_id: cmd.part_id,
            quantity: cmd.quantity,
            transaction_type: cmd.transaction_type,
            reference_type: cmd.reference_type.clone(),
            reference_id: cmd.reference_id,
            user_id: cmd.user_id,
            notes: cmd.notes.clone(),
            storage_location_id: cmd.storage_location_id,
        }
    }
}

/// How an issuance was costed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Costing {
    /// Units taken from batches, oldest first.
    Fifo(Vec<BatchConsumption>),
    /// The part had no open batches; only the aggregate level moved.
    Untracked,
}

impl Costing {
    pub fn batches(&self) -> &[BatchConsumption] {
        match self {
            Costing::Fifo(used) => used,
            Costing::Untracked => &[],
        }
    }

    pub fn total_cost(&self) -> Option<Decimal> {
        match self {
            Costing::Fifo(used) => Some(used.iter().map(BatchConsumption::cost).sum()),
            Costing::Untracked => None,
        }
    }
}

impl From<&stock_batch::Model> for Event {
    fn from(batch: &stock_batch::Model) -> Self {
        Event::StockReceived {
            part_id: batch.part_id,
            batch_id: batch.id,
            quantity: batch.quantity,
            unit_price: batch.unit_price,
            storage_location_id: batch.storage_location_id,
        }
    }
}

/// Location bookkeeping that could not be applied cleanly during an issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocationDrift {
    pub storage_location_id: i32,
    pub reason: DriftReason,
}

#[derive(Debug, Clone)]
pub struct IssueOutcome {
    pub transaction: stock_transaction::Model,
    pub costing: Costing,
    /// Set when the named location could not absorb the issuance. The same
    /// drift is published as `Event::ReconciliationNeeded`.
    pub location_drift: Option<LocationDrift>,
    /// Result of the post-commit reconciliation check, if it ran and found
    /// a mismatch.
    pub discrepancy: Option<Discrepancy>,
}

/// Oldest open batch of a part, i.e. the one the next issuance draws from.
#[derive(Debug, Clone, Serialize)]
pub struct FifoRecommendation {
    pub batch: stock_batch::Model,
    pub storage_location: Option<storage_location::Model>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub parts_migrated: usize,
    pub skipped_with_batches: usize,
    pub skipped_missing_part: usize,
}

#[derive(Clone)]
pub struct StockService {
    db_pool: Arc<DbPool>,
    event_sender: EventSender,
    settings: StockConfig,
}

impl StockService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, settings: StockConfig) -> Self {
        Self {
            db_pool,
            event_sender,
            settings,
        }
    }

    pub(crate) fn settings(&self) -> &StockConfig {
        &self.settings
    }

    /// Books incoming stock: raises the aggregate level, appends a `received`
    /// ledger row and opens a new FIFO batch linked to it.
    #[instrument(skip(self, uow))]
    pub async fn receive_stock(
        &self,
        cmd: ReceiveStockCommand,
        uow: UnitOfWork<'_>,
    ) -> Result<stock_batch::Model, ServiceError> {
        let txn = uow
            .begin(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        let result = receive_in(&txn, &cmd).await;
        let (_, batch) = settle(txn, result).await?;

        self.after_receipt(&batch, uow).await;
        Ok(batch)
    }

    /// Removes stock oldest-batch-first. All-or-nothing: a request that
    /// cannot be covered in full leaves batches, ledger and level untouched.
    #[instrument(skip(self, uow))]
    pub async fn issue_stock(
        &self,
        cmd: IssueStockCommand,
        uow: UnitOfWork<'_>,
    ) -> Result<IssueOutcome, ServiceError> {
        let txn = uow
            .begin(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        let result = issue_in(&txn, &cmd, &self.settings).await;
        let outcome = settle(txn, result).await?;

        Ok(self.after_issue(&cmd, outcome, uow).await)
    }

    /// Signed entry point. Zero is rejected, positive quantities are received
    /// at the part's buy price and negative ones issued. Returns the ledger
    /// row written.
    #[instrument(skip(self, uow))]
    pub async fn adjust_stock(
        &self,
        cmd: AdjustStockCommand,
        uow: UnitOfWork<'_>,
    ) -> Result<stock_transaction::Model, ServiceError> {
        if cmd.quantity == 0 {
            return Err(ServiceError::invalid_quantity(
                cmd.quantity,
                "adjustment quantity must not be zero",
            ));
        }

        if cmd.quantity < 0 {
            let outcome = self.issue_stock(IssueStockCommand::from(&cmd), uow).await?;
            return Ok(outcome.transaction);
        }

        let txn = uow
            .begin(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        let result = async {
            let part = find_part(&txn, cmd.part_id).await?;
            let receipt = ReceiveStockCommand {
                notes: cmd.notes.clone(),
                user_id: cmd.user_id,
                storage_location_id: cmd.storage_location_id,
                supplier_id: part.supplier_id,
                ..ReceiveStockCommand::new(cmd.part_id, cmd.quantity, part.buy_price)
            };
            receive_in(&txn, &receipt).await
        }
        .await;
        let (transaction, batch) = settle(txn, result).await?;

        self.after_receipt(&batch, uow).await;
        Ok(transaction)
    }

    /// Weighted FIFO unit cost of the next `quantity` units. Read-only.
    pub async fn get_fifo_cost(&self, part_id: i32, quantity: i32) -> Result<Decimal, ServiceError> {
        fifo_cost_on(self.db_pool.as_ref(), part_id, quantity).await
    }

    pub async fn list_stock_batches(
        &self,
        part_id: i32,
        include_empty: bool,
    ) -> Result<Vec<stock_batch::Model>, ServiceError> {
        let mut query = stock_batch::Entity::find().filter(stock_batch::Column::PartId.eq(part_id));
        if !include_empty {
            query = query.filter(stock_batch::Column::QuantityRemaining.gt(0));
        }
        query
            .order_by_asc(stock_batch::Column::ReceivedDate)
            .order_by_asc(stock_batch::Column::Id)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Ledger rows, newest first.
    pub async fn list_stock_transactions(
        &self,
        part_id: Option<i32>,
        limit: u64,
    ) -> Result<Vec<stock_transaction::Model>, ServiceError> {
        let mut query = stock_transaction::Entity::find();
        if let Some(part_id) = part_id {
            query = query.filter(stock_transaction::Column::PartId.eq(part_id));
        }
        query
            .order_by_desc(stock_transaction::Column::Timestamp)
            .order_by_desc(stock_transaction::Column::Id)
            .limit(limit)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// The batch FIFO will draw from next, across all locations.
    pub async fn fifo_recommendation(
        &self,
        part_id: i32,
    ) -> Result<Option<FifoRecommendation>, ServiceError> {
        let db = self.db_pool.as_ref();
        let Some(batch) = open_batches(db, part_id).await?.into_iter().next() else {
            return Ok(None);
        };
        let storage_location = batch
            .find_related(storage_location::Entity)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(Some(FifoRecommendation {
            batch,
            storage_location,
        }))
    }

    /// One-time backfill bringing pre-batch stock under FIFO tracking. Every
    /// part with stock on hand and no batches at all gets one `initial_stock`
    /// ledger row and one batch at its buy price. Parts that already have
    /// batches are skipped, so running it again is a no-op.
    #[instrument(skip(self, uow))]
    pub async fn migrate_existing_stock_to_batches(
        &self,
        user_id: Option<i32>,
        uow: UnitOfWork<'_>,
    ) -> Result<BackfillReport, ServiceError> {
        let txn = uow
            .begin(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        let result = backfill_in(&txn, user_id).await;
        let report = settle(txn, result).await?;

        info!(
            parts_migrated = report.parts_migrated,
            skipped_with_batches = report.skipped_with_batches,
            skipped_missing_part = report.skipped_missing_part,
            "Stock batch backfill finished"
        );
        if report.parts_migrated > 0 {
            self.event_sender
                .dispatch(
                    uow,
                    Event::BatchesBackfilled {
                        parts_migrated: report.parts_migrated,
                    },
                )
                .await;
        }
        Ok(report)
    }

    async fn after_receipt(&self, batch: &stock_batch::Model, uow: UnitOfWork<'_>) {
        counter!("cmms_stock.receipts", 1);
        info!(
            part_id = batch.part_id,
            batch_id = batch.id,
            quantity = batch.quantity,
            "Stock received"
        );
        self.event_sender
            .dispatch(uow, Event::from(batch))
            .await;
    }

    /// Post-commit side effects of an issuance: events and, when a location
    /// was named, the reconciliation check. Joined work reads through the
    /// caller's transaction and leaves its events in the caller's outbox.
    pub(crate) async fn after_issue(
        &self,
        cmd: &IssueStockCommand,
        mut outcome: IssueOutcome,
        uow: UnitOfWork<'_>,
    ) -> IssueOutcome {
        let part_id = cmd.part_id;
        // The ledger row is negative and was range-checked by `issue_in`.
        let quantity = outcome.transaction.quantity.saturating_neg();
        counter!("cmms_stock.issues", 1);

        let issued = match &outcome.costing {
            Costing::Fifo(used) => Event::StockIssued {
                part_id,
                transaction_id: outcome.transaction.id,
                quantity,
                batches_consumed: used.len(),
                reference_type: cmd.reference_type.clone(),
                reference_id: cmd.reference_id,
            },
            Costing::Untracked => {
                counter!("cmms_stock.untracked_issues", 1);
                Event::UntrackedIssue {
                    part_id,
                    transaction_id: outcome.transaction.id,
                    quantity,
                }
            }
        };
        self.event_sender.dispatch(uow, issued).await;

        if let Some(drift) = outcome.location_drift {
            counter!("cmms_stock.location_drift", 1);
            self.event_sender
                .dispatch(
                    uow,
                    Event::ReconciliationNeeded {
                        part_id,
                        storage_location_id: drift.storage_location_id,
                        reason: drift.reason,
                        detected_at: Utc::now(),
                    },
                )
                .await;
        }

        if cmd.storage_location_id.is_some() && self.settings.reconcile_after_issue {
            outcome.discrepancy = match uow {
                UnitOfWork::Owned => {
                    reconciliation::check_part(self.db_pool.as_ref(), part_id).await
                }
                UnitOfWork::Joined(parent, _) => reconciliation::check_part(parent, part_id).await,
            };
            if let Some(discrepancy) = &outcome.discrepancy {
                self.event_sender
                    .dispatch(uow, Event::from(discrepancy))
                    .await;
            }
        }

        outcome
    }
}

pub(crate) async fn find_part<C: ConnectionTrait>(
    conn: &C,
    part_id: i32,
) -> Result<part::Model, ServiceError> {
    part::Entity::find_by_id(part_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or(ServiceError::PartNotFound(part_id))
}

/// Open batches of a part in FIFO order: received date, then insertion order.
pub async fn open_batches<C: ConnectionTrait>(
    conn: &C,
    part_id: i32,
) -> Result<Vec<stock_batch::Model>, ServiceError> {
    stock_batch::Entity::find()
        .filter(stock_batch::Column::PartId.eq(part_id))
        .filter(stock_batch::Column::QuantityRemaining.gt(0))
        .order_by_asc(stock_batch::Column::ReceivedDate)
        .order_by_asc(stock_batch::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// FIFO cost preview on any connection, including an open transaction.
/// Without open batches the part's buy price is used; an unknown part costs
/// nothing.
pub async fn fifo_cost_on<C: ConnectionTrait>(
    conn: &C,
    part_id: i32,
    quantity: i32,
) -> Result<Decimal, ServiceError> {
    if quantity <= 0 {
        return Ok(Decimal::ZERO);
    }

    let batches = open_batches(conn, part_id).await?;
    if batches.is_empty() {
        let part = part::Entity::find_by_id(part_id)
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?;
        return Ok(part.map(|p| p.buy_price).unwrap_or(Decimal::ZERO));
    }

    let slices: Vec<BatchSlice> = batches.iter().map(BatchSlice::from).collect();
    Ok(fifo::fifo_unit_cost(&slices, quantity))
}

async fn lock_level<C: ConnectionTrait>(
    conn: &C,
    part_id: i32,
) -> Result<Option<inventory_level::Model>, ServiceError> {
    inventory_level::Entity::find()
        .filter(inventory_level::Column::PartId.eq(part_id))
        .lock_exclusive()
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

async fn ensure_storage_location(
    txn: &DatabaseTransaction,
    storage_location_id: i32,
) -> Result<(), ServiceError> {
    storage_location::Entity::find_by_id(storage_location_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .map(|_| ())
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Storage location {} not found", storage_location_id))
        })
}

pub(crate) async fn receive_in(
    txn: &DatabaseTransaction,
    cmd: &ReceiveStockCommand,
) -> Result<(stock_transaction::Model, stock_batch::Model), ServiceError> {
    if cmd.quantity <= 0 {
        return Err(ServiceError::invalid_quantity(
            cmd.quantity,
            "receipt quantity must be positive",
        ));
    }
    if cmd.unit_price.is_sign_negative() {
        return Err(ServiceError::ValidationError(format!(
            "Unit price must not be negative (got {})",
            cmd.unit_price
        )));
    }

    find_part(txn, cmd.part_id).await?;
    if let Some(supplier_id) = cmd.supplier_id {
        supplier::Entity::find_by_id(supplier_id)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Supplier {} not found", supplier_id)))?;
    }
    if let Some(location_id) = cmd.storage_location_id {
        ensure_storage_location(txn, location_id).await?;
    }

    let now = Utc::now();
    let received_date = cmd.received_date.unwrap_or(now);

    match lock_level(txn, cmd.part_id).await? {
        Some(level) => {
            let on_hand = level.quantity_on_hand;
            let raised = on_hand.checked_add(cmd.quantity).ok_or_else(|| {
                ServiceError::invalid_quantity(
                    cmd.quantity,
                    &format!("receipt must fit on top of the {} units on hand", on_hand),
                )
            })?;
            let mut active: inventory_level::ActiveModel = level.into();
            active.quantity_on_hand = Set(raised);
            active.last_updated = Set(now);
            active.update(txn).await.map_err(ServiceError::db_error)?;
        }
        None => {
            inventory_level::ActiveModel {
                part_id: Set(cmd.part_id),
                quantity_on_hand: Set(cmd.quantity),
                quantity_reserved: Set(0),
                bin_location: Set(None),
                last_updated: Set(now),
                ..Default::default()
            }
            .insert(txn)
            .await
            .map_err(ServiceError::db_error)?;
        }
    }

    let transaction = stock_transaction::ActiveModel {
        part_id: Set(cmd.part_id),
        transaction_type: Set(TransactionType::Received.as_str().to_string()),
        quantity: Set(cmd.quantity),
        reference_id: Set(None),
        reference_type: Set(None),
        user_id: Set(cmd.user_id),
        notes: Set(cmd.notes.clone()),
        timestamp: Set(received_date),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    let batch = stock_batch::ActiveModel {
        part_id: Set(cmd.part_id),
        quantity: Set(cmd.quantity),
        quantity_remaining: Set(cmd.quantity),
        unit_price: Set(cmd.unit_price),
        received_date: Set(received_date),
        supplier_id: Set(cmd.supplier_id),
        invoice_number: Set(cmd.invoice_number.clone()),
        notes: Set(cmd.notes.clone()),
        stock_transaction_id: Set(Some(transaction.id)),
        storage_location_id: Set(cmd.storage_location_id),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    if let Some(location_id) = cmd.storage_location_id {
        add_to_location(txn, cmd.part_id, location_id, cmd.quantity, now).await?;
    }

    audit::record(
        txn,
        AuditEntry::inventory(
            "receive",
            "stock_batch",
            batch.id,
            cmd.user_id,
            format!(
                "Received {} units of part {} at {}",
                cmd.quantity, cmd.part_id, cmd.unit_price
            ),
        )
        .with_metadata(json!({
            "part_id": cmd.part_id,
            "transaction_id": transaction.id,
            "invoice_number": cmd.invoice_number,
            "storage_location_id": cmd.storage_location_id,
        })),
    )
    .await;

    Ok((transaction, batch))
}

/// Increments the part's row at a location, creating it when absent.
pub(crate) async fn add_to_location(
    txn: &DatabaseTransaction,
    part_id: i32,
    storage_location_id: i32,
    quantity: i32,
    at: DateTime<Utc>,
) -> Result<part_location::Model, ServiceError> {
    let existing = part_location::Entity::find()
        .filter(part_location::Column::PartId.eq(part_id))
        .filter(part_location::Column::StorageLocationId.eq(storage_location_id))
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?;

    match existing {
        Some(row) => {
            let current = row.quantity;
            let raised = current.checked_add(quantity).ok_or_else(|| {
                ServiceError::invalid_quantity(
                    quantity,
                    &format!(
                        "location {} cannot hold more than its current {} units",
                        storage_location_id, current
                    ),
                )
            })?;
            let mut active: part_location::ActiveModel = row.into();
            active.quantity = Set(raised);
            active.last_movement_date = Set(at);
            active.update(txn).await.map_err(ServiceError::db_error)
        }
        None => part_location::ActiveModel {
            part_id: Set(part_id),
            storage_location_id: Set(storage_location_id),
            quantity: Set(quantity),
            assigned_date: Set(at),
            last_movement_date: Set(at),
            notes: Set(None),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error),
    }
}

pub(crate) async fn issue_in(
    txn: &DatabaseTransaction,
    cmd: &IssueStockCommand,
    settings: &StockConfig,
) -> Result<IssueOutcome, ServiceError> {
    if cmd.quantity >= 0 {
        return Err(ServiceError::invalid_quantity(
            cmd.quantity,
            "issue quantity must be negative; receipts go through receive_stock",
        ));
    }
    if matches!(
        cmd.transaction_type,
        TransactionType::Received | TransactionType::InitialStock
    ) {
        return Err(ServiceError::ValidationError(format!(
            "'{}' is not an issuance transaction type",
            cmd.transaction_type
        )));
    }

    let part_id = cmd.part_id;
    let magnitude = cmd.quantity.checked_neg().ok_or_else(|| {
        ServiceError::invalid_quantity(cmd.quantity, "issue quantity is out of range")
    })?;

    let level = lock_level(txn, part_id)
        .await?
        .ok_or(ServiceError::InventoryLevelNotFound(part_id))?;
    if level.quantity_on_hand < magnitude {
        return Err(ServiceError::InsufficientStock {
            part_id,
            requested: magnitude,
            available: level.quantity_on_hand,
        });
    }

    let batches = open_batches(txn, part_id).await?;
    let costing = if batches.is_empty() {
        if !settings.allow_untracked_issue {
            return Err(ServiceError::UntrackedStock(part_id));
        }
        warn!(
            part_id,
            quantity = magnitude,
            "No open batches; issuing without FIFO costing"
        );
        Costing::Untracked
    } else {
        let slices: Vec<BatchSlice> = batches.iter().map(BatchSlice::from).collect();
        let plan = fifo::plan_fifo_issue(&slices, magnitude);
        if !plan.is_complete() {
            return Err(ServiceError::InsufficientStock {
                part_id,
                requested: magnitude,
                available: plan.planned_quantity(),
            });
        }

        for used in &plan.consumptions {
            let batch = batches
                .iter()
                .find(|b| b.id == used.batch_id)
                .cloned()
                .ok_or_else(|| {
                    ServiceError::InternalError(format!("Planned batch {} vanished", used.batch_id))
                })?;
            let remaining = batch.quantity_remaining - used.quantity;
            let mut active: stock_batch::ActiveModel = batch.into();
            active.quantity_remaining = Set(remaining);
            active.update(txn).await.map_err(ServiceError::db_error)?;
        }
        Costing::Fifo(plan.consumptions)
    };

    let now = Utc::now();
    let on_hand = level.quantity_on_hand;
    let mut active_level: inventory_level::ActiveModel = level.into();
    active_level.quantity_on_hand = Set(on_hand - magnitude);
    active_level.last_updated = Set(now);
    active_level
        .update(txn)
        .await
        .map_err(ServiceError::db_error)?;

    let location_drift = match cmd.storage_location_id {
        Some(location_id) => take_from_location(txn, part_id, location_id, magnitude, now).await?,
        None => None,
    };

    let transaction = stock_transaction::ActiveModel {
        part_id: Set(part_id),
        transaction_type: Set(cmd.transaction_type.as_str().to_string()),
        quantity: Set(cmd.quantity),
        reference_id: Set(cmd.reference_id),
        reference_type: Set(cmd.reference_type.clone()),
        user_id: Set(cmd.user_id),
        notes: Set(cmd.notes.clone()),
        timestamp: Set(now),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    audit::record(
        txn,
        AuditEntry::inventory(
            "issue",
            "stock_transaction",
            transaction.id,
            cmd.user_id,
            format!("Issued {} units of part {}", magnitude, part_id),
        )
        .with_metadata(json!({
            "part_id": part_id,
            "reference_type": cmd.reference_type,
            "reference_id": cmd.reference_id,
            "batches": costing.batches(),
            "untracked": costing == Costing::Untracked,
        })),
    )
    .await;

    Ok(IssueOutcome {
        transaction,
        costing,
        location_drift,
        discrepancy: None,
    })
}

/// Deducts from the part's row at a location, flooring at zero and removing
/// the row once empty. Anything that cannot be deducted cleanly comes back as
/// drift instead of failing the issuance.
async fn take_from_location(
    txn: &DatabaseTransaction,
    part_id: i32,
    storage_location_id: i32,
    quantity: i32,
    at: DateTime<Utc>,
) -> Result<Option<LocationDrift>, ServiceError> {
    let row = part_location::Entity::find()
        .filter(part_location::Column::PartId.eq(part_id))
        .filter(part_location::Column::StorageLocationId.eq(storage_location_id))
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?;

    let Some(row) = row else {
        warn!(
            part_id,
            storage_location_id, "Issued from a location that holds no record of the part"
        );
        return Ok(Some(LocationDrift {
            storage_location_id,
            reason: DriftReason::MissingPartLocation,
        }));
    };

    let drift = (row.quantity < quantity).then(|| {
        warn!(
            part_id,
            storage_location_id,
            held = row.quantity,
            requested = quantity,
            "Location held less than issued; flooring at zero"
        );
        LocationDrift {
            storage_location_id,
            reason: DriftReason::LocationShortfall {
                missing: quantity - row.quantity,
            },
        }
    });

    let left = (row.quantity - quantity).max(0);
    if left == 0 {
        row.delete(txn).await.map_err(ServiceError::db_error)?;
    } else {
        let mut active: part_location::ActiveModel = row.into();
        active.quantity = Set(left);
        active.last_movement_date = Set(at);
        active.update(txn).await.map_err(ServiceError::db_error)?;
    }

    Ok(drift)
}

async fn backfill_in(
    txn: &DatabaseTransaction,
    user_id: Option<i32>,
) -> Result<BackfillReport, ServiceError> {
    let levels = inventory_level::Entity::find()
        .filter(inventory_level::Column::QuantityOnHand.gt(0))
        .order_by_asc(inventory_level::Column::PartId)
        .lock_exclusive()
        .all(txn)
        .await
        .map_err(ServiceError::db_error)?;

    let mut report = BackfillReport {
        parts_migrated: 0,
        skipped_with_batches: 0,
        skipped_missing_part: 0,
    };

    for level in levels {
        let existing = stock_batch::Entity::find()
            .filter(stock_batch::Column::PartId.eq(level.part_id))
            .count(txn)
            .await
            .map_err(ServiceError::db_error)?;
        if existing > 0 {
            report.skipped_with_batches += 1;
            continue;
        }

        let Some(part) = part::Entity::find_by_id(level.part_id)
            .one(txn)
            .await
            .map_err(ServiceError::db_error)?
        else {
            warn!(part_id = level.part_id, "Inventory level without a part; skipping");
            report.skipped_missing_part += 1;
            continue;
        };

        let transaction = stock_transaction::ActiveModel {
            part_id: Set(part.id),
            transaction_type: Set(TransactionType::InitialStock.as_str().to_string()),
            quantity: Set(level.quantity_on_hand),
            reference_id: Set(None),
            reference_type: Set(None),
            user_id: Set(user_id),
            notes: Set(Some(BACKFILL_NOTE.to_string())),
            timestamp: Set(part.created_at),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        stock_batch::ActiveModel {
            part_id: Set(part.id),
            quantity: Set(level.quantity_on_hand),
            quantity_remaining: Set(level.quantity_on_hand),
            unit_price: Set(part.buy_price),
            received_date: Set(part.created_at),
            supplier_id: Set(part.supplier_id),
            invoice_number: Set(None),
            notes: Set(Some(BACKFILL_NOTE.to_string())),
            stock_transaction_id: Set(Some(transaction.id)),
            storage_location_id: Set(None),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        info!(part_id = part.id, quantity = level.quantity_on_hand, "Backfilled stock batch");
        report.parts_migrated += 1;
    }

    if report.parts_migrated > 0 {
        audit::record(
            txn,
            AuditEntry {
                category: audit::CATEGORY_INVENTORY,
                action_type: "backfill",
                entity_type: "stock_batch",
                entity_id: None,
                user_id,
                description: format!(
                    "Backfilled FIFO batches for {} parts",
                    report.parts_migrated
                ),
                metadata: None,
            },
        )
        .await;
    }

    Ok(report)
}
