//! Error taxonomy for work order operations

use crate::{Stage, WorkOrderId};

/// Errors that can occur while loading, advancing, or mutating a work order
#[derive(Debug, thiserror::Error)]
pub enum WorkOrderError {
    #[error("Work order not found: {0}")]
    NotFound(WorkOrderId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transient adapter failure for agent '{agent}': {reason}")]
    TransientAdapter { agent: String, reason: String },

    #[error("Agent '{agent}' violated its result contract: {reason}")]
    ContractViolation { agent: String, reason: String },

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Concurrent writer raced: expected version {expected}, found {actual}")]
    ConcurrencyConflict { expected: u64, actual: u64 },

    #[error("Cancellation requested")]
    CancellationRequested,

    #[error("Work order is in terminal stage {0} and accepts no further mutation")]
    TerminalState(Stage),

    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Unknown approval gate: {0}")]
    UnknownGate(String),

    #[error("Work order is not awaiting approval (stage: {0})")]
    NotAwaitingApproval(Stage),

    #[error("Retry limit exhausted: {retry_count} of {max_retries}")]
    RetriesExhausted { retry_count: u32, max_retries: u32 },
}

impl WorkOrderError {
    /// Whether the caller should reload state and try again
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            WorkOrderError::ConcurrencyConflict { .. } | WorkOrderError::TerminalState(_)
        )
    }
}

/// Result type alias for work order operations
pub type WorkOrderResult<T> = Result<T, WorkOrderError>;
