use ulid::Ulid;

use crate::model::{BookingStatus, InvalidInterval};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    InvalidInterval(#[from] InvalidInterval),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("{0} is not a provider")]
    InvalidRole(Ulid),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    #[error("scheduling conflict with booking: {0}")]
    SchedulingConflict(Ulid),
    #[error("booking {0} is neither finished nor in the past")]
    NotHideable(Ulid),
    #[error("booking is {status}; it can no longer be edited")]
    Immutable { status: BookingStatus },
    #[error("review not allowed: {0}")]
    ReviewNotAllowed(&'static str),
    #[error("booking {0} already has a review")]
    Duplicate(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// The caller may try again (another slot, or the same request later)
    /// and reasonably expect a different outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::SchedulingConflict(_) | EngineError::Storage(_))
    }

    /// PostgreSQL SQLSTATE reported over the wire.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::Validation(_) | EngineError::InvalidInterval(_) => "22023",
            EngineError::NotFound(_) => "P0002",
            EngineError::InvalidRole(_) => "22P02",
            EngineError::Forbidden(_) => "42501",
            EngineError::IllegalTransition { .. }
            | EngineError::NotHideable(_)
            | EngineError::Immutable { .. }
            | EngineError::ReviewNotAllowed(_) => "55000",
            EngineError::SchedulingConflict(_) => "23P01",
            EngineError::Duplicate(_) => "23505",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::Storage(_) => "58030",
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::Validation(_) | EngineError::InvalidInterval(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidRole(_) => "invalid_role",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::IllegalTransition { .. } => "illegal_transition",
            EngineError::SchedulingConflict(_) => "scheduling_conflict",
            EngineError::NotHideable(_) => "not_hideable",
            EngineError::Immutable { .. } => "immutable",
            EngineError::ReviewNotAllowed(_) => "review_not_allowed",
            EngineError::Duplicate(_) => "duplicate",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Storage(_) => "storage",
        }
    }
}
