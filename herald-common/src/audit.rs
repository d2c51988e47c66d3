//! Audit events for the job and batch lifecycle
//!
//! Every transition the dispatcher makes is recorded as an [`AuditEvent`].
//! Events are persisted by the dispatcher's audit writer and also emitted as
//! structured `tracing` events through [`log_event`].
//!
//! ## Actions
//!
//! - `EmailQueued`, `EmailSending`, `EmailSent`, `EmailFailed`, `EmailProcessed`
//! - `BatchQueued`, `BatchSending`, `BatchSent`, `BatchFailed`
//!
//! ## PII Redaction
//!
//! Recipient addresses found in event metadata can be redacted from the log
//! output based on [`AuditConfig`]. Persisted events are never redacted.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{AuditId, BatchId, EmailId, MAX_ERROR_CODE_LEN, MAX_ERROR_LEN, cap_len};

/// Largest serialised metadata blob kept on an event, in bytes
pub const MAX_METADATA_BYTES: usize = 16 * 1024;

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Emit audit events to the log
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact recipient addresses in logged metadata
    #[serde(default)]
    pub redact_recipients: bool,

    /// Capacity of the dispatcher's audit channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_recipients: false,
            channel_capacity: default_channel_capacity(),
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_channel_capacity() -> usize {
    1024
}

static AUDIT_CONFIG: OnceLock<Arc<AuditConfig>> = OnceLock::new();

/// Initialise audit logging. Only the first call has any effect.
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

/// Redact the local part of an email address if redaction is enabled
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if redact {
        if let Some((_, domain)) = email.split_once('@') {
            format!("[REDACTED]@{domain}")
        } else {
            "[REDACTED]".to_string()
        }
    } else {
        email.to_string()
    }
}

#[must_use]
pub fn redact_emails(emails: &[String], redact: bool) -> Vec<String> {
    emails.iter().map(|e| redact_email(e, redact)).collect()
}

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    EmailQueued,
    EmailSending,
    EmailSent,
    EmailFailed,
    EmailProcessed,
    BatchQueued,
    BatchSending,
    BatchSent,
    BatchFailed,
}

impl AuditAction {
    pub const ALL: [Self; 9] = [
        Self::EmailQueued,
        Self::EmailSending,
        Self::EmailSent,
        Self::EmailFailed,
        Self::EmailProcessed,
        Self::BatchQueued,
        Self::BatchSending,
        Self::BatchSent,
        Self::BatchFailed,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmailQueued => "EmailQueued",
            Self::EmailSending => "EmailSending",
            Self::EmailSent => "EmailSent",
            Self::EmailFailed => "EmailFailed",
            Self::EmailProcessed => "EmailProcessed",
            Self::BatchQueued => "BatchQueued",
            Self::BatchSending => "BatchSending",
            Self::BatchSent => "BatchSent",
            Self::BatchFailed => "BatchFailed",
        }
    }

    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::EmailFailed | Self::BatchFailed)
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = crate::model::UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| crate::model::UnknownStatus(s.to_string()))
    }
}

/// Error captured at the time of the event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSnapshot {
    pub message: String,
    pub code: Option<String>,
}

impl ErrorSnapshot {
    #[must_use]
    pub fn new(message: &str, code: Option<&str>) -> Self {
        Self {
            message: cap_len(message, MAX_ERROR_LEN),
            code: code.map(|code| cap_len(code, MAX_ERROR_CODE_LEN)),
        }
    }
}

/// A write-once audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: AuditId,
    pub email_id: EmailId,
    pub batch_id: Option<BatchId>,
    pub action: AuditAction,
    pub details: String,
    pub error: Option<ErrorSnapshot>,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
    pub actor: Option<String>,
}

impl AuditEvent {
    /// Start building an event about `email_id`
    #[must_use]
    pub fn builder(email_id: EmailId, action: AuditAction) -> AuditEventBuilder {
        AuditEventBuilder {
            email_id,
            batch_id: None,
            action,
            details: String::new(),
            error: None,
            metadata: Value::Null,
            actor: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEventBuilder {
    email_id: EmailId,
    batch_id: Option<BatchId>,
    action: AuditAction,
    details: String,
    error: Option<ErrorSnapshot>,
    metadata: Value,
    actor: Option<String>,
}

impl AuditEventBuilder {
    #[must_use]
    pub const fn batch(mut self, batch_id: BatchId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }

    #[must_use]
    pub fn error(mut self, message: &str, code: Option<&str>) -> Self {
        self.error = Some(ErrorSnapshot::new(message, code));
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }

    #[must_use]
    pub fn build(self) -> AuditEvent {
        AuditEvent {
            id: AuditId::generate(),
            email_id: self.email_id,
            batch_id: self.batch_id,
            action: self.action,
            details: self.details,
            error: self.error,
            metadata: cap_metadata(self.metadata),
            timestamp: Utc::now(),
            actor: self.actor,
        }
    }
}

/// Replace metadata larger than [`MAX_METADATA_BYTES`] with a marker
#[must_use]
pub fn cap_metadata(metadata: Value) -> Value {
    let size = serde_json::to_vec(&metadata).map_or(0, |bytes| bytes.len());

    if size > MAX_METADATA_BYTES {
        serde_json::json!({
            "truncated": true,
            "originalSize": size,
        })
    } else {
        metadata
    }
}

fn redact_metadata(metadata: &Value, redact: bool) -> Value {
    let mut metadata = metadata.clone();

    if redact
        && let Some(recipients) = metadata.get_mut("recipients").and_then(Value::as_array_mut)
    {
        for recipient in recipients.iter_mut() {
            if let Some(address) = recipient.as_str() {
                *recipient = Value::String(redact_email(address, true));
            }
        }
    }

    metadata
}

/// Emit `event` as a structured log line
pub fn log_event(event: &AuditEvent) {
    let config = config();
    if !config.enabled {
        return;
    }

    let metadata = redact_metadata(&event.metadata, config.redact_recipients);
    let batch_id = event.batch_id.map(|id| id.to_string());
    let error = event.error.as_ref().map(|e| e.message.as_str());
    let error_code = event.error.as_ref().and_then(|e| e.code.as_deref());

    if event.action.is_failure() {
        tracing::event!(
            tracing::Level::WARN,
            event = %event.action,
            email_id = %event.email_id,
            batch_id = ?batch_id,
            error = ?error,
            error_code = ?error_code,
            metadata = %metadata,
            "Audit: {}",
            event.details
        );
    } else {
        tracing::event!(
            tracing::Level::INFO,
            event = %event.action,
            email_id = %event.email_id,
            batch_id = ?batch_id,
            metadata = %metadata,
            "Audit: {}",
            event.details
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_redact_email() {
        assert_eq!(
            redact_email("user@example.com", true),
            "[REDACTED]@example.com"
        );
        assert_eq!(redact_email("user@example.com", false), "user@example.com");
        assert_eq!(redact_email("invalid", true), "[REDACTED]");
    }

    #[test]
    fn test_redact_metadata_recipients() {
        let metadata = json!({ "recipients": ["a@example.com", "b@example.org"], "size": 2 });

        let redacted = redact_metadata(&metadata, true);
        assert_eq!(
            redacted["recipients"],
            json!(["[REDACTED]@example.com", "[REDACTED]@example.org"])
        );
        assert_eq!(redacted["size"], json!(2));
        assert_eq!(redact_metadata(&metadata, false), metadata);
    }

    #[test]
    fn test_builder() {
        let email_id = EmailId::generate();
        let batch_id = BatchId::generate();

        let event = AuditEvent::builder(email_id, AuditAction::BatchFailed)
            .batch(batch_id)
            .details("Batch failed after 3 attempts")
            .error("connection reset", Some("SEND_FAILED"))
            .metadata(json!({ "attempts": 3 }))
            .build();

        assert_eq!(event.email_id, email_id);
        assert_eq!(event.batch_id, Some(batch_id));
        assert_eq!(
            event.error,
            Some(ErrorSnapshot {
                message: String::from("connection reset"),
                code: Some(String::from("SEND_FAILED")),
            })
        );
        assert_eq!(event.metadata["attempts"], json!(3));
    }

    #[test]
    fn test_large_metadata_is_replaced() {
        let blob = "x".repeat(MAX_METADATA_BYTES + 1);
        let event = AuditEvent::builder(EmailId::generate(), AuditAction::EmailQueued)
            .metadata(json!({ "blob": blob }))
            .build();

        assert_eq!(event.metadata["truncated"], json!(true));
        assert!(event.metadata.get("blob").is_none());
    }

    #[test]
    fn test_action_names() {
        for action in AuditAction::ALL {
            assert_eq!(action.as_str().parse::<AuditAction>().ok(), Some(action));
        }
        assert!(AuditAction::BatchFailed.is_failure());
        assert!(!AuditAction::BatchSent.is_failure());
    }

    #[test]
    fn test_log_event_does_not_panic() {
        init(AuditConfig::default());
        let event = AuditEvent::builder(EmailId::generate(), AuditAction::EmailFailed)
            .error("boom", None)
            .build();
        log_event(&event);
    }
}
