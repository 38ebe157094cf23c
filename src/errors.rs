// src/errors.rs

use thiserror::Error;
use uuid::Uuid;

use crate::models::core::QueueStatus;
use crate::storage::StoreError;

/// Caller-facing error taxonomy for the resolution engine.
///
/// Oracle failures never appear here: they are absorbed into the documented
/// fallback behavior at the matcher / submission-handler boundary. Storage
/// and referential-integrity failures abort the enclosing operation and
/// propagate unmodified.
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// Bad or missing input. The caller's fault; never retried automatically.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A review transition was attempted on a queue item that is no longer
    /// pending. Surfaced so the caller can refresh its view of the queue.
    #[error("queue item {item_id} is already resolved (status: {status})")]
    InvalidState { item_id: Uuid, status: QueueStatus },

    /// A merge or discard could not rewrite dependent references or alias
    /// sets consistently. The whole transition was aborted; nothing changed.
    #[error("referential integrity violation during {action}: {detail}")]
    ReferentialIntegrity {
        action: &'static str,
        detail: String,
    },

    /// Underlying persistence unavailable or misbehaving. Retryable; no
    /// partial writes are assumed committed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for ResolutionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotPending { item_id, status } => {
                ResolutionError::InvalidState { item_id, status }
            }
            StoreError::AliasConflict { .. } => ResolutionError::ReferentialIntegrity {
                action: "alias update",
                detail: err.to_string(),
            },
            StoreError::MissingEntity(_) | StoreError::MissingItem(_) => {
                ResolutionError::Validation(err.to_string())
            }
            StoreError::Unavailable(msg) => ResolutionError::Storage(msg),
        }
    }
}
