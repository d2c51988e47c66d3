//! Service trait abstraction for dispatch operations
//!
//! Control interfaces talk to [`DispatchService`] rather than to the
//! processor, scheduler and submitter directly, so handlers can be tested
//! against a fake.

use std::sync::Arc;

use async_trait::async_trait;
use herald_common::{EmailId, EmailStatus, audit::AuditEvent};
use herald_store::AuditFilter;

use crate::{
    DispatchError, DispatchStatus, EmailProcessor, EmailSubmitter, JobView, NewEmail,
    RecoveryReport, RecoveryScheduler, RetryReport, Submitted,
};

#[async_trait]
pub trait DispatchService: Send + Sync {
    async fn submit(&self, submission: NewEmail) -> Result<Submitted, DispatchError>;

    /// Queue an existing job
    ///
    /// # Errors
    /// [`DispatchError::QueueFull`] when the queue refuses it
    async fn enqueue(&self, id: EmailId) -> Result<(), DispatchError>;

    /// Process a job now, on the caller's task
    async fn process(&self, id: EmailId) -> Result<EmailStatus, DispatchError>;

    async fn retry(&self, id: EmailId, actor: Option<String>) -> Result<RetryReport, DispatchError>;

    async fn view(&self, id: EmailId) -> Result<JobView, DispatchError>;

    /// Audit events, newest first
    async fn audit(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>, DispatchError>;

    async fn recover(&self) -> RecoveryReport;

    fn status(&self) -> DispatchStatus;
}

/// The running engine: one processor with its scheduler and submitter
#[derive(Debug, Clone)]
pub struct Dispatcher {
    processor: Arc<EmailProcessor>,
    recovery: RecoveryScheduler,
    submitter: EmailSubmitter,
}

impl Dispatcher {
    #[must_use]
    pub fn new(processor: Arc<EmailProcessor>) -> Self {
        Self {
            recovery: RecoveryScheduler::new(processor.clone()),
            submitter: EmailSubmitter::new(processor.clone()),
            processor,
        }
    }

    #[must_use]
    pub const fn processor(&self) -> &Arc<EmailProcessor> {
        &self.processor
    }

    #[must_use]
    pub const fn recovery(&self) -> &RecoveryScheduler {
        &self.recovery
    }

    #[must_use]
    pub const fn submitter(&self) -> &EmailSubmitter {
        &self.submitter
    }
}

#[async_trait]
impl DispatchService for Dispatcher {
    async fn submit(&self, submission: NewEmail) -> Result<Submitted, DispatchError> {
        self.submitter.submit(submission).await
    }

    async fn enqueue(&self, id: EmailId) -> Result<(), DispatchError> {
        // Surface unknown ids instead of queueing them
        self.processor.load_email(id).await?;

        if self.processor.queue_email(id) {
            Ok(())
        } else {
            Err(DispatchError::QueueFull {
                capacity: self.processor.queue.capacity(),
            })
        }
    }

    async fn process(&self, id: EmailId) -> Result<EmailStatus, DispatchError> {
        self.processor.process_email(id).await
    }

    async fn retry(&self, id: EmailId, actor: Option<String>) -> Result<RetryReport, DispatchError> {
        self.processor.retry_failed_batches(id, actor).await
    }

    async fn view(&self, id: EmailId) -> Result<JobView, DispatchError> {
        self.processor.view(id).await
    }

    async fn audit(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>, DispatchError> {
        self.processor.history(filter).await
    }

    async fn recover(&self) -> RecoveryReport {
        self.recovery.run_once().await
    }

    fn status(&self) -> DispatchStatus {
        self.processor.get_status()
    }
}
