//! Error types for the command pipeline

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Core Pipeline Errors
    // =============================

    /// The approval is not in the source state the requested transition
    /// expects. Also returned to the loser of a concurrent decide race.
    #[error("Invalid transition: approval {approval_id} is {current}, expected Pending")]
    InvalidTransition {
        approval_id: Uuid,
        current: crate::models::ApprovalStatus,
    },

    /// The plan cannot run: its approval is still pending or was rejected.
    #[error("Plan not executable: {0}")]
    NotExecutable(String),

    /// Idempotent no-op signal: the plan already ran. Callers treat this as
    /// success-already-happened rather than retrying.
    #[error("Plan {0} already executed")]
    AlreadyExecuted(Uuid),

    #[error("Plan not found: {0}")]
    PlanNotFound(Uuid),

    #[error("Approval not found: {0}")]
    ApprovalNotFound(Uuid),

    #[error("Storage error: {0}")]
    StorageError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
