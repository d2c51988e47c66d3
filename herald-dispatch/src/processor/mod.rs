//! The dispatch orchestrator
//!
//! [`EmailProcessor`] drains the [`JobQueue`] one job at a time. Each job's
//! pending batches are sent in fixed windows of `concurrency`, every batch
//! moving `Pending → Sending → {Sent | Failed}` through conditional store
//! updates. The job's own status is derived from its batches once they
//! settle.

mod batch;
mod retry;

use std::sync::Arc;

use dashmap::DashSet;
use herald_common::{
    BatchId, Email, EmailBatch, EmailId, EmailStatus, Signal,
    audit::{AuditAction, AuditEvent},
    internal,
};
use herald_metrics::DispatchMetrics;
use herald_store::{
    AuditFilter, BackingStore, BatchFilter, BatchTransitions, EmailTransitions,
};
use herald_transport::EmailSendingService;
use serde::{Deserialize, Serialize};

pub use self::{batch::{BatchOutcome, BatchSummary}, retry::RetryReport};
use crate::{AuditTrail, DispatchConfig, DispatchError, JobQueue, StatusSync};

/// What the processor is doing right now
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStatus {
    pub queue_length: usize,
    pub currently_processing: Vec<EmailId>,
    pub processing_batches: Vec<BatchId>,
}

/// A job together with its batches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobView {
    pub email: Email,
    pub batches: Vec<EmailBatch>,
}

pub(crate) fn metrics() -> Option<&'static DispatchMetrics> {
    herald_metrics::metrics().map(|metrics| &metrics.dispatch)
}

/// Removes `id` from `set` when dropped
struct Claim<'a, T: Eq + std::hash::Hash> {
    set: &'a DashSet<T>,
    id: T,
}

impl<'a, T: Eq + std::hash::Hash + Copy> Claim<'a, T> {
    /// `None` when `id` is already claimed
    fn acquire(set: &'a DashSet<T>, id: T) -> Option<Self> {
        set.insert(id).then_some(Self { set, id })
    }
}

impl<T: Eq + std::hash::Hash> Drop for Claim<'_, T> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

#[derive(Debug)]
pub struct EmailProcessor {
    pub(crate) config: DispatchConfig,
    pub(crate) store: Arc<dyn BackingStore>,
    pub(crate) batches: BatchTransitions,
    pub(crate) emails: EmailTransitions,
    transport: EmailSendingService,
    pub(crate) queue: JobQueue,
    /// Jobs this process is working on
    processing: DashSet<EmailId>,
    /// Batches this process is sending right now
    in_flight: DashSet<BatchId>,
    pub(crate) status_sync: StatusSync,
    pub(crate) audit: AuditTrail,
}

impl EmailProcessor {
    /// Build a processor over `store`, sending through `transport`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// [`DispatchError::Config`] when `config` is unusable
    pub fn new(
        config: DispatchConfig,
        store: Arc<dyn BackingStore>,
        transport: EmailSendingService,
        audit: AuditTrail,
    ) -> Result<Self, DispatchError> {
        internal!("Initialising Email Processor ...");
        config.validate()?;

        if config.sender.trim().is_empty() {
            tracing::warn!("No sender address configured, every batch will fail");
        }

        if !transport.is_configured() {
            tracing::warn!("Transport is not configured, every batch will fail");
        }

        let emails = EmailTransitions::new(store.clone());

        Ok(Self {
            batches: BatchTransitions::new(store.clone()),
            status_sync: StatusSync::new(emails.clone(), config.debounce()),
            emails,
            queue: JobQueue::new(config.queue_capacity),
            processing: DashSet::new(),
            in_flight: DashSet::new(),
            config,
            store,
            transport,
            audit,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn BackingStore> {
        self.store.clone()
    }

    #[must_use]
    pub const fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Queue a job for the worker. `false` when the queue is full.
    pub fn queue_email(&self, id: EmailId) -> bool {
        let queued = self.queue.push(id);

        if queued {
            tracing::debug!(email_id = %id, "Queued email");
        } else {
            tracing::warn!(
                email_id = %id,
                capacity = self.queue.capacity(),
                "Queue is full, email not queued"
            );
        }

        if let Some(metrics) = metrics() {
            metrics.set_queue_length(self.queue.len() as u64);
        }

        queued
    }

    #[must_use]
    pub fn get_status(&self) -> DispatchStatus {
        DispatchStatus {
            queue_length: self.queue.len(),
            currently_processing: self.processing.iter().map(|id| *id).collect(),
            processing_batches: self.in_flight.iter().map(|id| *id).collect(),
        }
    }

    #[must_use]
    pub fn is_processing(&self, id: EmailId) -> bool {
        self.processing.contains(&id)
    }

    #[must_use]
    pub fn is_in_flight(&self, id: BatchId) -> bool {
        self.in_flight.contains(&id)
    }

    /// A job and its batches
    pub async fn view(&self, id: EmailId) -> Result<JobView, DispatchError> {
        let email = self.load_email(id).await?;
        let batches = self.store.list_batches(&BatchFilter::for_email(id)).await?;

        Ok(JobView { email, batches })
    }

    /// Audit events, newest first
    pub async fn history(&self, filter: AuditFilter) -> Result<Vec<AuditEvent>, DispatchError> {
        Ok(self.store.list_audit(filter).await?)
    }

    pub(crate) async fn load_email(&self, id: EmailId) -> Result<Email, DispatchError> {
        self.store
            .read_email(id)
            .await
            .map_err(|e| DispatchError::from_store(id, e))
    }

    /// Send every pending batch of a job and settle its status.
    ///
    /// A job this process is already working on, or one that is terminal
    /// or in flight elsewhere, is returned as-is.
    ///
    /// # Errors
    /// [`DispatchError::NotFound`] for an unknown job. Any other error forces
    /// the job to `FAILED` before it is returned.
    pub async fn process_email(&self, id: EmailId) -> Result<EmailStatus, DispatchError> {
        let Some(_claim) = Claim::acquire(&self.processing, id) else {
            tracing::debug!(email_id = %id, "Email is already being processed");
            return Ok(self.load_email(id).await?.status);
        };

        match self.run_email(id).await {
            Ok(status) => Ok(status),
            Err(e @ DispatchError::NotFound(_)) => Err(e),
            Err(e) => {
                tracing::error!(email_id = %id, error = %e, "Email processing failed");

                if let Err(fail) = self.emails.fail(id).await {
                    tracing::error!(email_id = %id, error = %fail, "Failed to mark email as failed");
                }

                self.audit.record(
                    AuditEvent::builder(id, AuditAction::EmailFailed)
                        .details("Processing failed")
                        .error(&e.to_string(), Some(e.code()))
                        .build(),
                );

                if let Some(metrics) = metrics() {
                    metrics.record_job_finished(EmailStatus::Failed.as_str());
                }

                Err(e)
            }
        }
    }

    async fn run_email(&self, id: EmailId) -> Result<EmailStatus, DispatchError> {
        let email = self.load_email(id).await?;

        if email.status.is_terminal() {
            tracing::debug!(email_id = %id, status = %email.status, "Email already finished");
            return Ok(email.status);
        }

        let Some(email) = self.start_email(id).await? else {
            let current = self.load_email(id).await?;
            tracing::debug!(
                email_id = %id,
                status = %current.status,
                "Email was picked up elsewhere"
            );
            return Ok(current.status);
        };

        self.audit.record(
            AuditEvent::builder(id, AuditAction::EmailSending)
                .details("Started sending")
                .build(),
        );

        let summary = self.process_email_batches(&email).await?;

        // The final write below supersedes any sync still pending from the
        // batches settling.
        self.status_sync.cancel(id);
        let email = self.emails.sync_status(id).await?;
        self.record_outcome(&email, &summary);

        Ok(email.status)
    }

    /// Move the job `QUEUED → SENDING`, trying twice.
    ///
    /// `None` when the job could not be claimed; nothing should be sent.
    async fn start_email(&self, id: EmailId) -> Result<Option<Email>, DispatchError> {
        for _ in 0..2 {
            if let Some(started) = self.emails.start(id).await? {
                return Ok(Some(started));
            }

            if self.load_email(id).await?.status != EmailStatus::Queued {
                return Ok(None);
            }
        }

        tracing::warn!(email_id = %id, "Email stayed QUEUED but could not be started");
        Ok(None)
    }

    fn record_outcome(&self, email: &Email, summary: &BatchSummary) {
        let action = match email.status {
            EmailStatus::Sent => AuditAction::EmailSent,
            EmailStatus::Failed => AuditAction::EmailFailed,
            EmailStatus::Processed => AuditAction::EmailProcessed,
            EmailStatus::Queued | EmailStatus::Sending => {
                tracing::info!(
                    email_id = %email.id,
                    status = %email.status,
                    "Email still has batches in flight"
                );
                return;
            }
        };

        if summary.total() == 0 && email.status == EmailStatus::Failed {
            tracing::warn!(email_id = %email.id, "Email has no batches to send, marking failed");
        }

        tracing::info!(
            email_id = %email.id,
            status = %email.status,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Email finished"
        );

        self.audit.record(
            AuditEvent::builder(email.id, action)
                .details(format!("Email {}", email.status))
                .metadata(serde_json::json!({
                    "succeeded": summary.succeeded,
                    "failed": summary.failed,
                    "skipped": summary.skipped,
                }))
                .build(),
        );

        if let Some(metrics) = metrics() {
            metrics.record_job_finished(email.status.as_str());
        }
    }

    /// Drain the queue until a shutdown signal arrives.
    ///
    /// A job that has started is finished before shutting down.
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), DispatchError> {
        internal!("Email processor starting");

        loop {
            tokio::select! {
                id = self.queue.next() => {
                    if let Some(metrics) = metrics() {
                        metrics.set_queue_length(self.queue.len() as u64);
                    }

                    match self.process_email(id).await {
                        Ok(status) => {
                            tracing::debug!(email_id = %id, status = %status, "Processed email");
                        }
                        Err(e) => {
                            tracing::error!(email_id = %id, error = %e, "Error processing email");
                        }
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Email processor received shutdown signal");
                        }
                        Err(e) => {
                            tracing::error!("Email processor shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        self.audit.flush().await;
        internal!("Email processor shutdown complete");

        Ok(())
    }
}
