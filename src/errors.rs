use sea_orm::error::DbErr;
use sea_orm::TransactionError;
use serde::Serialize;

/// Errors raised by the stock engine and the services built on it.
///
/// Validation and business-rule failures roll back the enclosing unit of
/// work. Audit and event failures never surface here; they are logged.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Part {0} not found")]
    PartNotFound(i32),

    #[error("Inventory level for part {0} not found")]
    InventoryLevelNotFound(i32),

    #[error("Insufficient stock for part {part_id}: requested {requested}, available {available}")]
    InsufficientStock {
        part_id: i32,
        requested: i32,
        available: i32,
    },

    #[error("Part {0} has on-hand stock but no open batches; run the batch backfill first")]
    UntrackedStock(i32),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<TransactionError<ServiceError>> for ServiceError {
    fn from(err: TransactionError<ServiceError>) -> Self {
        match err {
            TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
            TransactionError::Transaction(service_err) => service_err,
        }
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    pub fn invalid_quantity(quantity: i32, expectation: &str) -> Self {
        ServiceError::InvalidQuantity(format!("{} (got {})", expectation, quantity))
    }

    /// Stable key a presentation layer maps to a localized message.
    pub fn user_message_key(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) => "internal_error",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::PartNotFound(_) => "part_not_found",
            Self::InventoryLevelNotFound(_) => "inventory_level_not_found",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::UntrackedStock(_) => "untracked_stock",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::Conflict(_) => "conflict",
        }
    }

    /// True for caller mistakes and business-rule rejections, as opposed to
    /// infrastructure failures.
    pub fn is_business_rule(&self) -> bool {
        !matches!(self, Self::DatabaseError(_) | Self::InternalError(_))
    }
}
