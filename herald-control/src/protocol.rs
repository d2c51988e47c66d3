//! Control protocol types
//!
//! Everything here crosses the socket as bincode, which cannot carry
//! self-describing values. Audit metadata therefore travels as a JSON string
//! inside [`AuditEntry`].

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use herald_common::{
    BatchId, EmailId,
    audit::{AuditAction, AuditEvent},
};
use herald_dispatch::{
    DispatchStatus, JobView, NewEmail, RecoveryReport, RetryReport, Submitted,
};
use serde::{Deserialize, Serialize};

/// Current protocol version
pub const PROTOCOL_VERSION: u32 = 1;

fn format_timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(
        || "-".to_string(),
        |at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

/// Request sent to the control server (versioned wrapper)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version
    pub version: u32,
    /// Who is asking, recorded on audit events the command produces
    #[serde(default)]
    pub actor: Option<String>,
    /// The actual command to execute
    pub command: RequestCommand,
}

/// Request command types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestCommand {
    /// System management commands
    System(SystemCommand),
    /// Job submission and lifecycle commands
    Job(JobCommand),
    /// Audit trail queries
    Audit(AuditCommand),
    /// Recovery commands
    Recovery(RecoveryCommand),
}

/// System management commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SystemCommand {
    /// Health check / ping
    Ping,
    /// Queue length and the work in progress
    Status,
}

/// Job commands; identifiers are sent as strings and parsed by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobCommand {
    /// Create a job and its batches, then queue it
    Submit(NewEmail),
    /// Put an existing job on the queue
    Enqueue { email_id: String },
    /// Process a job now and wait for the result
    Process { email_id: String },
    /// Reset the job's failed batches and queue it again
    Retry { email_id: String },
    /// The job with its batches
    View { email_id: String },
}

/// Audit trail queries, newest event first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuditCommand {
    Email { email_id: String },
    Batch { batch_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecoveryCommand {
    /// Run one recovery pass now
    Run,
}

/// Response from the control server (versioned wrapper)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Protocol version
    pub version: u32,
    /// The actual response payload
    pub payload: ResponsePayload,
}

/// Response payload types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponsePayload {
    /// Command succeeded
    Ok,
    /// Command succeeded with data
    Data(Box<ResponseData>),
    /// Command failed
    Error {
        /// Stable machine-readable code, when the failure has one
        code: Option<String>,
        message: String,
    },
}

/// Response data types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponseData {
    /// System status information
    SystemStatus(SystemStatus),
    /// A freshly submitted job
    Submitted(Box<Submitted>),
    /// A job's status after a command acted on it
    JobStatus(JobStatus),
    /// Outcome of a retry
    Retry(RetryReport),
    /// A job and its batches
    Job(Box<JobView>),
    /// Audit events, newest first
    Audit(Vec<AuditEntry>),
    /// Outcome of a recovery pass
    Recovery(RecoveryReport),
    /// Simple string message
    Message(String),
}

/// System status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Server version
    pub version: String,
    /// Uptime in seconds
    pub uptime_secs: u64,
    pub dispatch: DispatchStatus,
}

/// A job id and its status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub email_id: EmailId,
    pub status: String,
}

/// An audit event as it crosses the socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub email_id: EmailId,
    pub batch_id: Option<BatchId>,
    pub action: AuditAction,
    pub details: String,
    pub error: Option<String>,
    pub error_code: Option<String>,
    /// Metadata encoded as JSON
    pub metadata: String,
    pub timestamp: DateTime<Utc>,
    pub actor: Option<String>,
}

impl From<&AuditEvent> for AuditEntry {
    fn from(event: &AuditEvent) -> Self {
        Self {
            id: event.id.to_string(),
            email_id: event.email_id,
            batch_id: event.batch_id,
            action: event.action,
            details: event.details.clone(),
            error: event.error.as_ref().map(|e| e.message.clone()),
            error_code: event.error.as_ref().and_then(|e| e.code.clone()),
            metadata: event.metadata.to_string(),
            timestamp: event.timestamp,
            actor: event.actor.clone(),
        }
    }
}

impl Display for AuditEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{}  {:<14}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.action
        ))?;
        if let Some(batch_id) = self.batch_id {
            f.write_fmt(format_args!("  batch={batch_id}"))?;
        }
        f.write_fmt(format_args!("  {}", self.details))?;
        if let Some(error) = &self.error {
            f.write_fmt(format_args!(
                "  error={error} ({})",
                self.error_code.as_deref().unwrap_or("-")
            ))?;
        }
        if let Some(actor) = &self.actor {
            f.write_fmt(format_args!("  actor={actor}"))?;
        }
        Ok(())
    }
}

impl Display for SystemStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Version:     {}\n", self.version))?;
        f.write_fmt(format_args!("Uptime:      {}s\n", self.uptime_secs))?;
        f.write_fmt(format_args!("Queue:       {}\n", self.dispatch.queue_length))?;
        f.write_fmt(format_args!(
            "Processing:  {}\n",
            self.dispatch.currently_processing.len()
        ))?;
        for id in &self.dispatch.currently_processing {
            f.write_fmt(format_args!("  job   {id}\n"))?;
        }
        f.write_fmt(format_args!(
            "In flight:   {}\n",
            self.dispatch.processing_batches.len()
        ))?;
        for id in &self.dispatch.processing_batches {
            f.write_fmt(format_args!("  batch {id}\n"))?;
        }
        Ok(())
    }
}

impl Display for ResponseData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SystemStatus(status) => status.fmt(f),
            Self::Submitted(submitted) => {
                f.write_fmt(format_args!("ID:        {}\n", submitted.email.id))?;
                f.write_fmt(format_args!("Status:    {}\n", submitted.email.status))?;
                f.write_fmt(format_args!("Batches:   {}\n", submitted.batches))?;
                f.write_fmt(format_args!(
                    "Queued:    {}\n",
                    if submitted.queued {
                        "yes"
                    } else {
                        "no (queue full, recovery will pick it up)"
                    }
                ))
            }
            Self::JobStatus(job) => {
                f.write_fmt(format_args!("{}: {}\n", job.email_id, job.status))
            }
            Self::Retry(report) => f.write_fmt(format_args!(
                "Reset {} batch(es), queued: {}\n",
                report.batches_reset, report.queued
            )),
            Self::Job(view) => {
                let email = &view.email;
                f.write_fmt(format_args!("ID:        {}\n", email.id))?;
                f.write_fmt(format_args!("Subject:   {}\n", email.subject))?;
                f.write_fmt(format_args!("Status:    {}\n", email.status))?;
                if let Some(owner) = &email.owner {
                    f.write_fmt(format_args!("Owner:     {owner}\n"))?;
                }
                f.write_fmt(format_args!(
                    "Created:   {}\n",
                    format_timestamp(Some(email.created_at))
                ))?;
                f.write_fmt(format_args!(
                    "Started:   {}\n",
                    format_timestamp(email.started_at)
                ))?;
                f.write_fmt(format_args!(
                    "Completed: {}\n",
                    format_timestamp(email.completed_at)
                ))?;
                f.write_fmt(format_args!("Batches:   {}\n", view.batches.len()))?;
                for batch in &view.batches {
                    f.write_fmt(format_args!(
                        "  {}  {:<8} {:>4} recipient(s)  attempts={}",
                        batch.id,
                        batch.status,
                        batch.recipients.len(),
                        batch.attempts
                    ))?;
                    if let Some(error) = &batch.last_error {
                        f.write_fmt(format_args!(
                            "  error={error} ({})",
                            batch.error_code.as_deref().unwrap_or("-")
                        ))?;
                    }
                    f.write_str("\n")?;
                }
                Ok(())
            }
            Self::Audit(entries) => {
                if entries.is_empty() {
                    return f.write_str("No audit events\n");
                }
                for entry in entries {
                    f.write_fmt(format_args!("{entry}\n"))?;
                }
                Ok(())
            }
            Self::Recovery(report) => {
                f.write_fmt(format_args!(
                    "Stuck jobs reset:     {}\n",
                    report.stuck_emails_reset
                ))?;
                f.write_fmt(format_args!(
                    "Stuck batches reset:  {}\n",
                    report.stuck_batches_reset
                ))?;
                f.write_fmt(format_args!(
                    "Queued jobs enqueued: {}\n",
                    report.pending_emails_queued
                ))
            }
            Self::Message(message) => f.write_fmt(format_args!("{message}\n")),
        }
    }
}

impl Request {
    /// Create a new request with the current protocol version
    #[must_use]
    pub const fn new(command: RequestCommand) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            actor: None,
            command,
        }
    }

    /// Attribute the request to `actor`
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Check if the request version is compatible with the current version
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}

impl Response {
    /// Create an error response without a code
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Error {
                code: None,
                message: message.into(),
            },
        }
    }

    /// Create an error response carrying a stable error code
    #[must_use]
    pub fn error_with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Error {
                code: Some(code.into()),
                message: message.into(),
            },
        }
    }

    /// Create a success response with no data
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Ok,
        }
    }

    /// Create a response with data
    #[must_use]
    pub fn data(data: ResponseData) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Data(Box::new(data)),
        }
    }

    /// Check if the response indicates success (not an error)
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self.payload, ResponsePayload::Error { .. })
    }

    /// Check if the response version is compatible with the current version
    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}
