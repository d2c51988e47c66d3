//! Transport error types
//!
//! Every failure carries a stable code, stored on the batch as `error_code`.
//! Validation failures describe a message that can never be sent as-is and
//! are not retried; credential and send failures may be transient.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Sender address is required")]
    MissingSender,

    #[error("At least one recipient is required")]
    NoRecipients,

    #[error("Subject is required")]
    EmptySubject,

    #[error("Transport is not configured: {0}")]
    NotConfigured(String),

    #[error("Failed to refresh access token: {0}")]
    TokenRefresh(String),

    #[error("Failed to send message: {0}")]
    Send(String),

    #[error("Max attempts must be at least 1, got {0}")]
    InvalidAttempts(u32),
}

impl TransportError {
    /// Stable machine-readable code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingSender => "MISSING_SENDER",
            Self::NoRecipients => "NO_RECIPIENTS",
            Self::EmptySubject => "EMPTY_SUBJECT",
            Self::NotConfigured(_) => "NOT_CONFIGURED",
            Self::TokenRefresh(_) => "TOKEN_REFRESH_FAILED",
            Self::Send(_) => "SEND_FAILED",
            Self::InvalidAttempts(_) => "INVALID_ATTEMPTS",
        }
    }

    /// The message itself is unsendable
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingSender | Self::NoRecipients | Self::EmptySubject | Self::InvalidAttempts(_)
        )
    }

    /// Another attempt may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TokenRefresh(_) | Self::Send(_))
    }
}
