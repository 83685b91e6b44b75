//! Error types for the inventory and transfer engine.

use thiserror::Error;
use tool_store::{StoreError, TransferRequestId, TransferStatus, UnknownLabel};

pub type InventoryResult<T> = Result<T, InventoryError>;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: String, key: String },

    #[error("Transfer request {id} is already {status}")]
    AlreadyTerminal {
        id: TransferRequestId,
        status: TransferStatus,
    },

    #[error("Duplicate {entity}: {key}")]
    Duplicate { entity: String, key: String },

    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The world changed between reading and deciding; nothing was written.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A reconciliation pass stopped before every status update landed.
    /// Updates already applied are kept and no inventory check was recorded.
    #[error(
        "Reconciliation incomplete: {applied} status updates applied, {failed} failed ({reason})"
    )]
    PartialBatchFailure {
        applied: usize,
        failed: usize,
        reason: String,
    },

    #[error("Registration error: {0}")]
    Registration(#[from] crate::session::SessionError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl InventoryError {
    pub fn not_found(entity: impl Into<String>, key: impl ToString) -> Self {
        InventoryError::NotFound {
            entity: entity.into(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, InventoryError::NotFound { .. })
    }
}

impl From<StoreError> for InventoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, key } => InventoryError::NotFound {
                entity: entity.to_string(),
                key,
            },
            StoreError::Duplicate { entity, key } => InventoryError::Duplicate {
                entity: entity.to_string(),
                key,
            },
            StoreError::AlreadyTerminal { id, status } => {
                InventoryError::AlreadyTerminal { id, status }
            }
            StoreError::Conflict(msg) => InventoryError::Conflict(msg),
            StoreError::StorageError(msg) => InventoryError::Storage(msg),
        }
    }
}

impl From<UnknownLabel> for InventoryError {
    fn from(err: UnknownLabel) -> Self {
        InventoryError::NotFound {
            entity: err.kind.to_string(),
            key: err.label,
        }
    }
}
