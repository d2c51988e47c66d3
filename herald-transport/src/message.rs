use serde::{Deserialize, Serialize};

use crate::TransportError;

/// A message ready to hand to the transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub from: String,
    pub to: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub html: String,
}

impl OutboundMessage {
    /// Reject messages that no number of attempts could send.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.from.trim().is_empty() {
            return Err(TransportError::MissingSender);
        }

        if self.to.is_empty() && self.bcc.is_empty() {
            return Err(TransportError::NoRecipients);
        }

        if self.subject.trim().is_empty() {
            return Err(TransportError::EmptySubject);
        }

        Ok(())
    }

    #[must_use]
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.bcc.len()
    }
}

/// What the remote end said about an accepted message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportResponse {
    /// Provider message id, when one was returned
    pub message_id: Option<String>,
    /// Raw response text
    pub response: String,
}
