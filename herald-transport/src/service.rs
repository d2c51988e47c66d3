use std::{sync::Arc, time::Duration};

use crate::{
    CredentialSource, Mailer, OutboundMessage, RetryPolicy, TransportError, TransportResponse,
};

/// A send that eventually succeeded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub response: TransportResponse,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

/// A send that gave up
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct SendFailure {
    /// The last failure seen
    pub error: TransportError,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
enum Backend {
    Ready {
        credentials: Arc<dyn CredentialSource>,
        mailer: Arc<dyn Mailer>,
    },
    Unconfigured(String),
}

/// The transport adapter
///
/// Validates each message, fetches a fresh credential, and hands the
/// message to the [`Mailer`].
#[derive(Debug, Clone)]
pub struct EmailSendingService {
    backend: Backend,
}

impl EmailSendingService {
    #[must_use]
    pub fn new(credentials: Arc<dyn CredentialSource>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            backend: Backend::Ready {
                credentials,
                mailer,
            },
        }
    }

    /// A service whose every send fails with `NOT_CONFIGURED`
    #[must_use]
    pub fn unconfigured(reason: impl Into<String>) -> Self {
        Self {
            backend: Backend::Unconfigured(reason.into()),
        }
    }

    #[must_use]
    pub const fn is_configured(&self) -> bool {
        matches!(self.backend, Backend::Ready { .. })
    }

    /// Send `message` once.
    pub async fn send(&self, message: &OutboundMessage) -> Result<TransportResponse, TransportError> {
        message.validate()?;

        let (credentials, mailer) = match &self.backend {
            Backend::Ready {
                credentials,
                mailer,
            } => (credentials, mailer),
            Backend::Unconfigured(reason) => {
                return Err(TransportError::NotConfigured(reason.clone()));
            }
        };

        let token = credentials.access_token().await?;
        let response = mailer.deliver(message, &token).await?;

        tracing::debug!(
            recipients = message.recipient_count(),
            response = %response.response,
            "Message accepted by transport"
        );

        Ok(response)
    }

    /// Send `message`, retrying transient failures with exponential backoff.
    ///
    /// # Errors
    /// The last failure and the number of attempts made. Validation failures
    /// stop after the first attempt; `max_attempts == 0` fails without any.
    pub async fn send_with_retry(
        &self,
        message: &OutboundMessage,
        max_attempts: u32,
        initial_delay: Duration,
    ) -> Result<SendOutcome, SendFailure> {
        if max_attempts < 1 {
            return Err(SendFailure {
                error: TransportError::InvalidAttempts(max_attempts),
                attempts: 0,
            });
        }

        let policy = RetryPolicy::new(max_attempts, initial_delay);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.send(message).await {
                Ok(response) => {
                    return Ok(SendOutcome {
                        response,
                        attempts: attempt,
                    });
                }
                Err(error) if !error.is_retryable() || !policy.should_retry(attempt) => {
                    return Err(SendFailure {
                        error,
                        attempts: attempt,
                    });
                }
                Err(error) => {
                    let delay = policy.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        code = error.code(),
                        "Send failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
