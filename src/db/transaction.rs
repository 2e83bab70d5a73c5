/*!
 * Transaction ownership for stock operations
 *
 * Every mutating operation states who owns the transaction it runs in.
 * `UnitOfWork::Owned` makes the operation begin and settle its own
 * transaction; `UnitOfWork::Joined` runs it inside a savepoint of a
 * transaction the caller owns and will commit. Joined work also carries the
 * caller's event outbox, since its events may only go out after that commit.
 */

use crate::{errors::ServiceError, events::EventOutbox};
use metrics::counter;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub enum UnitOfWork<'a> {
    /// The operation opens a transaction on the pool and commits or rolls it
    /// back itself.
    Owned,
    /// The caller holds the outer transaction. The operation works in a
    /// savepoint so a failure undoes only its own writes; the outer commit is
    /// the caller's decision, as is flushing the outbox afterwards.
    Joined(&'a DatabaseTransaction, &'a EventOutbox),
}

impl<'a> UnitOfWork<'a> {
    /// Starts the transaction (or savepoint) the operation will write through.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let txn = uow.begin(&db).await?;
    /// let result = do_writes(&txn).await;
    /// settle(txn, result).await
    /// ```
    pub async fn begin(self, db: &DatabaseConnection) -> Result<DatabaseTransaction, DbErr> {
        match self {
            UnitOfWork::Owned => {
                counter!("cmms_stock_db.transaction.started", 1);
                db.begin().await
            }
            UnitOfWork::Joined(parent, _) => {
                debug!("Opening savepoint inside caller transaction");
                parent.begin().await
            }
        }
    }
}

/// Commits `txn` when `result` is `Ok`, rolls it back otherwise.
pub async fn settle<T>(
    txn: DatabaseTransaction,
    result: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    match result {
        Ok(value) => {
            txn.commit().await.map_err(ServiceError::db_error)?;
            counter!("cmms_stock_db.transaction.committed", 1);
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "Rollback failed after error: {}", err);
            }
            counter!("cmms_stock_db.transaction.rolled_back", 1);
            Err(err)
        }
    }
}
