//! Periodic repair of work abandoned by a crash or restart
//!
//! Each pass:
//! 1. resets jobs stuck in `SENDING` past the staleness threshold to `QUEUED`
//! 2. resets `SENDING` batches this process is not sending back to `PENDING`
//! 3. queues every `QUEUED` job
//!
//! Batches in flight in another process sharing the store look abandoned
//! to this one, so step 2 may resend them.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use herald_common::{
    BatchStatus, EmailStatus, Signal,
    audit::{AuditAction, AuditEvent},
    internal,
};
use herald_store::BatchFilter;
use serde::{Deserialize, Serialize};

use crate::{EmailProcessor, processor::metrics};

/// What a recovery pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub stuck_emails_reset: usize,
    pub stuck_batches_reset: usize,
    pub pending_emails_queued: usize,
}

#[derive(Debug, Clone)]
pub struct RecoveryScheduler {
    processor: Arc<EmailProcessor>,
    interval: Duration,
    stale_after: Duration,
}

impl RecoveryScheduler {
    #[must_use]
    pub fn new(processor: Arc<EmailProcessor>) -> Self {
        let config = processor.config();

        Self {
            interval: config.recovery_interval(),
            stale_after: config.stale_after(),
            processor,
        }
    }

    /// Run one pass. Individual failures are logged and skipped.
    pub async fn run_once(&self) -> RecoveryReport {
        let report = RecoveryReport {
            stuck_emails_reset: self.reset_stuck_emails().await,
            stuck_batches_reset: self.reset_stuck_batches().await,
            pending_emails_queued: self.queue_pending_emails().await,
        };

        if report == RecoveryReport::default() {
            tracing::debug!("Recovery found nothing to do");
        } else {
            tracing::info!(
                stuck_emails_reset = report.stuck_emails_reset,
                stuck_batches_reset = report.stuck_batches_reset,
                pending_emails_queued = report.pending_emails_queued,
                "Recovery pass complete"
            );
        }

        if let Some(metrics) = metrics() {
            metrics.record_recovery("emails", report.stuck_emails_reset as u64);
            metrics.record_recovery("batches", report.stuck_batches_reset as u64);
        }

        report
    }

    async fn reset_stuck_emails(&self) -> usize {
        let sending = match self
            .processor
            .store
            .list_emails(Some(&[EmailStatus::Sending]))
            .await
        {
            Ok(sending) => sending,
            Err(e) => {
                tracing::error!(error = %e, "Recovery could not list sending emails");
                return 0;
            }
        };

        let cutoff = chrono::Duration::from_std(self.stale_after)
            .ok()
            .and_then(|stale_after| Utc::now().checked_sub_signed(stale_after));

        let mut reset = 0;

        for email in sending {
            if self.processor.is_processing(email.id) {
                continue;
            }

            let stale = match (email.started_at, cutoff) {
                (None, _) => true,
                (Some(started), Some(cutoff)) => started < cutoff,
                (Some(_), None) => false,
            };

            if !stale {
                continue;
            }

            match self.processor.emails.reset_stuck(email.id).await {
                Ok(Some(_)) => {
                    tracing::warn!(email_id = %email.id, "Reset stuck email to QUEUED");
                    self.processor.audit.record(
                        AuditEvent::builder(email.id, AuditAction::EmailQueued)
                            .details("Reset by recovery after stalling in SENDING")
                            .build(),
                    );
                    reset += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(email_id = %email.id, error = %e, "Failed to reset stuck email");
                }
            }
        }

        reset
    }

    async fn reset_stuck_batches(&self) -> usize {
        let filter = BatchFilter::default().with_status(BatchStatus::Sending);

        let sending = match self.processor.store.list_batches(&filter).await {
            Ok(sending) => sending,
            Err(e) => {
                tracing::error!(error = %e, "Recovery could not list sending batches");
                return 0;
            }
        };

        let mut reset = 0;

        for batch in sending {
            if self.processor.is_in_flight(batch.id) {
                continue;
            }

            match self.processor.batches.reset_for_retry(batch.id).await {
                Ok(_) => {
                    tracing::warn!(
                        email_id = %batch.email_id,
                        batch_id = %batch.id,
                        "Reset orphaned batch to PENDING"
                    );
                    self.processor.audit.record(
                        AuditEvent::builder(batch.email_id, AuditAction::BatchQueued)
                            .batch(batch.id)
                            .details("Reset by recovery")
                            .build(),
                    );
                    reset += 1;
                }
                Err(e) => {
                    tracing::warn!(batch_id = %batch.id, error = %e, "Failed to reset orphaned batch");
                }
            }
        }

        reset
    }

    async fn queue_pending_emails(&self) -> usize {
        let queued = match self
            .processor
            .store
            .list_emails(Some(&[EmailStatus::Queued]))
            .await
        {
            Ok(queued) => queued,
            Err(e) => {
                tracing::error!(error = %e, "Recovery could not list queued emails");
                return 0;
            }
        };

        queued
            .into_iter()
            .filter(|email| self.processor.queue_email(email.id))
            .count()
    }

    /// Run a pass every interval, starting immediately, until shutdown.
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), crate::DispatchError> {
        internal!(
            "Recovery scheduler starting (interval={}s, stale after={}s)",
            self.interval.as_secs(),
            self.stale_after.as_secs()
        );

        let mut timer = tokio::time::interval(self.interval.max(Duration::from_secs(1)));
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.run_once().await;
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Recovery scheduler received shutdown signal");
                        }
                        Err(e) => {
                            tracing::error!("Recovery scheduler shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        Ok(())
    }
}
