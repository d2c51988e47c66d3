use herald_common::{
    BatchStatus, EmailId, EmailStatus,
    audit::{AuditAction, AuditEvent},
};
use herald_store::BatchFilter;
use herald_transport::TransportError;
use serde::{Deserialize, Serialize};

use super::EmailProcessor;
use crate::DispatchError;

/// Result of a manual retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryReport {
    pub batches_reset: usize,
    /// Whether the job made it onto the queue; recovery picks it up otherwise
    pub queued: bool,
}

impl EmailProcessor {
    /// Put a job's failed batches back to `PENDING` and queue it again.
    ///
    /// Batches that failed for having no recipients stay failed.
    ///
    /// # Errors
    /// [`DispatchError::Busy`] while the job is being processed or in flight,
    /// [`DispatchError::Validation`] when nothing can be retried.
    pub async fn retry_failed_batches(
        &self,
        id: EmailId,
        actor: Option<String>,
    ) -> Result<RetryReport, DispatchError> {
        if self.is_processing(id) {
            return Err(DispatchError::Busy(id));
        }

        let email = self.load_email(id).await?;
        if email.status == EmailStatus::Sending {
            return Err(DispatchError::Busy(id));
        }

        let failed = self
            .store
            .list_batches(&BatchFilter::for_email(id).with_status(BatchStatus::Failed))
            .await?;

        let retryable: Vec<_> = failed
            .into_iter()
            .filter(|batch| {
                batch.error_code.as_deref() != Some(TransportError::NoRecipients.code())
            })
            .collect();

        if retryable.is_empty() {
            return Err(DispatchError::Validation(format!(
                "Email {id} has no failed batches to retry"
            )));
        }

        // A late sync from the previous run must not overwrite the reset
        self.status_sync.cancel(id);

        for batch in &retryable {
            self.batches.reset_for_retry(batch.id).await?;

            self.audit.record(
                AuditEvent::builder(id, AuditAction::BatchQueued)
                    .batch(batch.id)
                    .details("Queued for manual retry")
                    .actor(actor.clone())
                    .build(),
            );
        }

        self.emails.reset(id).await?;
        self.audit.record(
            AuditEvent::builder(id, AuditAction::EmailQueued)
                .details(format!("Retrying {} failed batch(es)", retryable.len()))
                .actor(actor)
                .build(),
        );

        let queued = self.queue_email(id);

        tracing::info!(
            email_id = %id,
            batches_reset = retryable.len(),
            queued,
            "Retrying failed batches"
        );

        Ok(RetryReport {
            batches_reset: retryable.len(),
            queued,
        })
    }
}
