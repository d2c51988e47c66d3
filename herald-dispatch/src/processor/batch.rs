use std::time::Instant;

use futures_util::future::join_all;
use herald_common::{
    BatchFailure, BatchStatus, DeliveryMode, Email, EmailBatch,
    audit::{AuditAction, AuditEvent},
    outgoing,
};
use herald_store::{BatchFilter, TransitionError};
use herald_transport::{OutboundMessage, TransportError};

use super::{Claim, EmailProcessor, metrics};
use crate::DispatchError;

/// How a single batch ended for this call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Sent,
    /// Marked failed without trying the transport
    Failed,
    /// Someone else already claimed or settled it
    Skipped,
}

/// Aggregate of one pass over a job's pending batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchSummary {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

impl EmailProcessor {
    /// Send this job's `PENDING` batches, `concurrency` at a time.
    ///
    /// Every batch in a window settles before the next window starts; one
    /// failure does not stop the others.
    pub async fn process_email_batches(&self, email: &Email) -> Result<BatchSummary, DispatchError> {
        let pending = self
            .store
            .list_batches(&BatchFilter::for_email(email.id).with_status(BatchStatus::Pending))
            .await?;

        let mut summary = BatchSummary::default();

        for window in pending.chunks(self.config.concurrency.max(1)) {
            let results = join_all(
                window
                    .iter()
                    .map(|batch| self.process_email_batch(batch, email)),
            )
            .await;

            for (batch, result) in window.iter().zip(results) {
                match result {
                    Ok(BatchOutcome::Sent) => summary.succeeded += 1,
                    Ok(BatchOutcome::Failed) => summary.failed += 1,
                    Ok(BatchOutcome::Skipped) => summary.skipped += 1,
                    Err(e) => {
                        tracing::warn!(
                            email_id = %email.id,
                            batch_id = %batch.id,
                            error = %e,
                            "Batch failed"
                        );
                        summary.failed += 1;
                    }
                }
            }
        }

        tracing::info!(
            email_id = %email.id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Processed batches"
        );

        Ok(summary)
    }

    /// Claim, send and settle one batch.
    ///
    /// # Errors
    /// The transport failure once retries are exhausted (the batch is already
    /// marked `FAILED`), or an unexpected state or store error.
    pub async fn process_email_batch(
        &self,
        batch: &EmailBatch,
        email: &Email,
    ) -> Result<BatchOutcome, DispatchError> {
        if batch.recipients.is_empty() {
            let error = TransportError::NoRecipients;
            self.settle_failed(batch, email, &error, None).await?;
            return Ok(BatchOutcome::Failed);
        }

        // Held across the store claim so recovery never sees our SENDING
        // batch without it.
        let Some(_in_flight) = Claim::acquire(&self.in_flight, batch.id) else {
            return Ok(BatchOutcome::Skipped);
        };

        let claimed = match self.batches.mark_sending(batch.id).await {
            Ok(claimed) => claimed,
            Err(TransitionError::Conflict { current })
                if matches!(current.status, BatchStatus::Sent | BatchStatus::Sending) =>
            {
                tracing::debug!(
                    batch_id = %batch.id,
                    status = %current.status,
                    "Batch already claimed"
                );
                return Ok(BatchOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(metrics) = metrics() {
            metrics.batch_started();
        }

        self.audit.record(
            AuditEvent::builder(email.id, AuditAction::BatchSending)
                .batch(claimed.id)
                .details(format!("Sending attempt {}", claimed.attempts))
                .build(),
        );

        let message = self.build_message(&claimed, email);
        let started = Instant::now();

        outgoing!(
            level = DEBUG,
            "Sending batch {} to {} recipient(s)",
            claimed.id,
            claimed.recipients.len()
        );

        let result = self
            .transport
            .send_with_retry(
                &message,
                self.config.max_attempts,
                self.config.initial_retry_delay(),
            )
            .await;

        if let Some(metrics) = metrics() {
            metrics.batch_finished();
        }

        match result {
            Ok(outcome) => {
                self.batches
                    .mark_sent(
                        claimed.id,
                        Some(outcome.attempts),
                        Some(outcome.response.response.clone()),
                    )
                    .await?;

                self.audit.record(
                    AuditEvent::builder(email.id, AuditAction::BatchSent)
                        .batch(claimed.id)
                        .details(format!("Sent to {} recipient(s)", claimed.recipients.len()))
                        .metadata(serde_json::json!({
                            "attempts": outcome.attempts,
                            "response": outcome.response.response,
                            "messageId": outcome.response.message_id,
                            "recipients": claimed.recipients,
                        }))
                        .build(),
                );
                self.status_sync.schedule(email.id);

                if let Some(metrics) = metrics() {
                    metrics.record_batch_sent(outcome.attempts, started.elapsed().as_secs_f64());
                }

                Ok(BatchOutcome::Sent)
            }
            Err(failure) => {
                self.settle_failed(&claimed, email, &failure.error, Some(failure.attempts))
                    .await?;
                Err(failure.into())
            }
        }
    }

    async fn settle_failed(
        &self,
        batch: &EmailBatch,
        email: &Email,
        error: &TransportError,
        attempts: Option<u32>,
    ) -> Result<(), DispatchError> {
        let message = error.to_string();
        let failure = BatchFailure::new(&message, Some(error.code()));

        let settled = self.batches.mark_failed(batch.id, failure, attempts).await?;

        self.audit.record(
            AuditEvent::builder(email.id, AuditAction::BatchFailed)
                .batch(batch.id)
                .details(format!("Failed after {} attempt(s)", settled.attempts))
                .error(&message, Some(error.code()))
                .metadata(serde_json::json!({
                    "attempts": settled.attempts,
                    "recipients": batch.recipients,
                }))
                .build(),
        );
        self.status_sync.schedule(email.id);

        if let Some(metrics) = metrics() {
            metrics.record_batch_failed(settled.attempts, error.code());
        }

        Ok(())
    }

    /// Address `batch` according to its delivery mode
    pub(crate) fn build_message(&self, batch: &EmailBatch, email: &Email) -> OutboundMessage {
        let sender = self.config.sender.trim().to_string();

        let (to, bcc) = match batch.mode {
            DeliveryMode::Individual => (batch.recipients.clone(), Vec::new()),
            DeliveryMode::Bcc => (vec![sender.clone()], batch.recipients.clone()),
        };

        OutboundMessage {
            from: sender,
            to,
            bcc,
            subject: email.subject.clone(),
            html: email.body.clone(),
        }
    }
}
