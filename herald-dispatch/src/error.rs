//! Typed errors for dispatch operations.
//!
//! Validation failures are raised before any transition and are never
//! retried. Transport failures have already been retried by the time they
//! surface here. Lost transition races that resolve on re-read never
//! become errors at all.

use herald_common::EmailId;
use herald_store::{StoreError, TransitionError};
use herald_transport::SendFailure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// No job with this id exists.
    #[error("Email not found: {0}")]
    NotFound(EmailId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A batch was in a state no caller expected.
    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    /// A batch exhausted its send attempts.
    #[error("Transport error: {0}")]
    Transport(#[from] SendFailure),

    /// Input rejected before any state changed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The in-process queue is at capacity.
    #[error("Queue is full ({capacity} jobs waiting)")]
    QueueFull { capacity: usize },

    /// The job is being processed and cannot be changed right now.
    #[error("Email {0} is in flight")]
    Busy(EmailId),

    /// Settings the engine cannot run with.
    #[error("Invalid dispatch configuration: {0}")]
    Config(String),
}

impl DispatchError {
    /// Stable code recorded with audit error snapshots
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Store(_) => "STORE_ERROR",
            Self::Transition(_) => "TRANSITION_CONFLICT",
            Self::Transport(failure) => failure.error.code(),
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::QueueFull { .. } => "QUEUE_FULL",
            Self::Busy(_) => "IN_FLIGHT",
            Self::Config(_) => "INVALID_CONFIG",
        }
    }

    /// Map a store miss on `id` to [`DispatchError::NotFound`]
    pub(crate) fn from_store(id: EmailId, error: StoreError) -> Self {
        if error.is_not_found() {
            Self::NotFound(id)
        } else {
            Self::Store(error)
        }
    }
}
