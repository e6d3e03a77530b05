use thiserror::Error;
use uuid::Uuid;

use crate::domain::task::TaskStatus;

/// Errors raised by task and message store implementations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task not found: {0}")]
    NotFound(Uuid),

    #[error("Task already exists: {0}")]
    DuplicateId(Uuid),

    #[error("Invalid state transition for task {id} from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
