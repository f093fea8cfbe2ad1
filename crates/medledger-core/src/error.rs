//! Engine error taxonomy.

use thiserror::Error;

use crate::auth::AuthzError;
use crate::db::DbError;

/// Broad class of an [`EngineError`], used for retry decisions and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is malformed.
    Validation,
    /// The request is valid but the current state forbids it.
    BusinessState,
    /// Infrastructure hiccup; nothing durable was written.
    Transient,
    Authorization,
    Internal,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid transfer: source and destination ward are both {0}")]
    InvalidTransfer(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("idempotency key {0} was already used for a different request")]
    IdempotencyConflict(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("drug not found: {0}")]
    DrugNotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("insufficient stock for drug {drug_id}: requested {requested}, available {available}")]
    InsufficientStock {
        drug_id: String,
        requested: u32,
        available: u32,
    },

    #[error("timed out waiting for a lock; retry")]
    LockTimeout,

    #[error("no store connection available; retry")]
    PoolExhausted,

    #[error("store connection lost; retry")]
    ConnectionLost,

    #[error(transparent)]
    Denied(#[from] AuthzError),

    #[error("internal store error")]
    Internal(#[source] DbError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidTransfer(_)
            | EngineError::InvalidQuantity(_)
            | EngineError::InvalidInput(_)
            | EngineError::IdempotencyConflict(_) => ErrorKind::Validation,
            EngineError::OrderNotFound(_)
            | EngineError::DrugNotFound(_)
            | EngineError::InvalidState(_)
            | EngineError::InsufficientStock { .. } => ErrorKind::BusinessState,
            EngineError::LockTimeout | EngineError::PoolExhausted | EngineError::ConnectionLost => {
                ErrorKind::Transient
            }
            EngineError::Denied(_) => ErrorKind::Authorization,
            EngineError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only transient failures are safe to retry as-is.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Emit this error at the level its class calls for.
    pub(crate) fn log(&self, operation: &'static str) {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::BusinessState | ErrorKind::Authorization => {
                tracing::info!(operation, error = %self, "request rejected");
            }
            ErrorKind::Transient => {
                tracing::warn!(operation, error = %self, "transient store failure");
            }
            ErrorKind::Internal => {
                let source = match self {
                    EngineError::Internal(db) => db.to_string(),
                    _ => String::new(),
                };
                tracing::error!(operation, error = %self, source = %source, "internal failure");
            }
        }
    }
}

impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        if err.is_lock_timeout() {
            return EngineError::LockTimeout;
        }
        if err.is_connection_lost() {
            return EngineError::ConnectionLost;
        }
        match err {
            DbError::PoolTimeout(_) => EngineError::PoolExhausted,
            DbError::InsufficientStock {
                drug_id,
                requested,
                available,
            } => EngineError::InsufficientStock {
                drug_id,
                requested,
                available,
            },
            other => EngineError::Internal(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
