//! Job submission

use std::{collections::HashSet, sync::Arc};

use herald_common::{
    DeliveryMode, Email, EmailBatch,
    audit::{AuditAction, AuditEvent},
};
use herald_store::BackingStore;
use serde::{Deserialize, Serialize};

use crate::{AuditTrail, DispatchError, EmailProcessor};

/// Largest HTML body accepted, in bytes
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Most recipients a single job may address
pub const MAX_RECIPIENTS: usize = 1000;

/// A job as submitted by a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEmail {
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub owner: Option<String>,
    /// Falls back to the configured delivery mode
    #[serde(default)]
    pub mode: Option<DeliveryMode>,
}

/// A persisted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitted {
    pub email: Email,
    pub batches: usize,
    /// `false` when the queue was full; recovery will pick the job up
    pub queued: bool,
}

/// Validates, persists and queues new jobs
#[derive(Debug, Clone)]
pub struct EmailSubmitter {
    processor: Arc<EmailProcessor>,
    store: Arc<dyn BackingStore>,
    audit: AuditTrail,
}

impl EmailSubmitter {
    #[must_use]
    pub fn new(processor: Arc<EmailProcessor>) -> Self {
        Self {
            store: processor.store(),
            audit: processor.audit().clone(),
            processor,
        }
    }

    /// Persist `submission` as a `QUEUED` job split into batches, and queue it.
    ///
    /// # Errors
    /// [`DispatchError::Validation`] before anything is written, or a store
    /// error while writing.
    pub async fn submit(&self, submission: NewEmail) -> Result<Submitted, DispatchError> {
        let config = self.processor.config();
        let recipients = validate(&submission)?;
        let mode = submission.mode.unwrap_or(config.delivery_mode);

        let email = Email::new(submission.subject.trim(), submission.body, submission.owner);
        let batches: Vec<_> = recipients
            .chunks(config.batch_size.max(1))
            .map(|chunk| EmailBatch::new(email.id, chunk.to_vec(), mode))
            .collect();

        self.store.insert_email(&email).await?;
        self.store.insert_batches(&batches).await?;

        self.audit.record(
            AuditEvent::builder(email.id, AuditAction::EmailQueued)
                .details(format!(
                    "Queued for {} recipient(s) in {} batch(es)",
                    recipients.len(),
                    batches.len()
                ))
                .actor(email.owner.clone())
                .build(),
        );

        for batch in &batches {
            self.audit.record(
                AuditEvent::builder(email.id, AuditAction::BatchQueued)
                    .batch(batch.id)
                    .details(format!("{} recipient(s)", batch.recipients.len()))
                    .metadata(serde_json::json!({ "recipients": batch.recipients }))
                    .actor(email.owner.clone())
                    .build(),
            );
        }

        let queued = self.processor.queue_email(email.id);

        tracing::info!(
            email_id = %email.id,
            recipients = recipients.len(),
            batches = batches.len(),
            queued,
            "Submitted email"
        );

        Ok(Submitted {
            batches: batches.len(),
            email,
            queued,
        })
    }
}

/// Check a submission and return its normalised, de-duplicated recipients
fn validate(submission: &NewEmail) -> Result<Vec<String>, DispatchError> {
    if submission.subject.trim().is_empty() {
        return Err(DispatchError::Validation("Subject is required".into()));
    }

    if submission.body.trim().is_empty() {
        return Err(DispatchError::Validation("Body is required".into()));
    }

    if submission.body.len() > MAX_BODY_BYTES {
        return Err(DispatchError::Validation(format!(
            "Body is {} bytes, the limit is {MAX_BODY_BYTES}",
            submission.body.len()
        )));
    }

    let mut seen = HashSet::new();
    let mut recipients = Vec::new();

    for raw in &submission.recipients {
        let address = raw.trim().to_lowercase();
        if address.is_empty() {
            continue;
        }

        if !is_valid_address(&address) {
            return Err(DispatchError::Validation(format!(
                "Invalid recipient address: {address}"
            )));
        }

        if seen.insert(address.clone()) {
            recipients.push(address);
        }
    }

    if recipients.is_empty() {
        return Err(DispatchError::Validation("At least one recipient is required".into()));
    }

    if recipients.len() > MAX_RECIPIENTS {
        return Err(DispatchError::Validation(format!(
            "{} recipients given, the limit is {MAX_RECIPIENTS}",
            recipients.len()
        )));
    }

    Ok(recipients)
}

fn is_valid_address(address: &str) -> bool {
    let Some((local, domain)) = address.split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !address.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(recipients: &[&str]) -> NewEmail {
        NewEmail {
            subject: "Launch".into(),
            body: "<p>We shipped</p>".into(),
            recipients: recipients.iter().map(ToString::to_string).collect(),
            owner: None,
            mode: None,
        }
    }

    #[test]
    fn test_recipients_are_normalised_and_deduplicated() {
        let recipients = validate(&submission(&[
            " Alice@Example.com ",
            "bob@example.com",
            "alice@example.com",
            "",
        ]))
        .expect("valid");

        assert_eq!(recipients, vec!["alice@example.com", "bob@example.com"]);
    }

    #[test]
    fn test_invalid_addresses_are_rejected() {
        for bad in ["no-at-sign", "@example.com", "alice@", "a@b@c", "a b@example.com"] {
            assert!(
                matches!(validate(&submission(&[bad])), Err(DispatchError::Validation(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_recipient_limits() {
        assert!(validate(&submission(&[])).is_err());

        let many: Vec<String> = (0..=MAX_RECIPIENTS)
            .map(|i| format!("user{i}@example.com"))
            .collect();
        let many: Vec<&str> = many.iter().map(String::as_str).collect();
        assert!(validate(&submission(&many)).is_err());
        assert_eq!(
            validate(&submission(&many[..MAX_RECIPIENTS])).map(|r| r.len()).ok(),
            Some(MAX_RECIPIENTS)
        );
    }

    #[test]
    fn test_subject_and_body_are_required() {
        let mut empty_subject = submission(&["a@example.com"]);
        empty_subject.subject = "   ".into();
        assert!(validate(&empty_subject).is_err());

        let mut huge_body = submission(&["a@example.com"]);
        huge_body.body = "x".repeat(MAX_BODY_BYTES + 1);
        assert!(validate(&huge_body).is_err());
    }
}
