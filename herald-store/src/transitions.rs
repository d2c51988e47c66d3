//! Named status transitions on top of a [`BackingStore`]
//!
//! Every guarded transition is exactly one conditional store update. What
//! happens on a missed precondition differs per transition:
//!
//! | transition        | from                | on miss                              |
//! |-------------------|---------------------|--------------------------------------|
//! | `mark_sending`    | `Pending`           | [`TransitionError::Conflict`]        |
//! | `mark_sent`       | `Sending`           | current record if terminal           |
//! | `mark_failed`     | `Pending`/`Sending` | current record if terminal           |
//! | `reset_for_retry` | any                 | n/a                                  |

use std::sync::Arc;

use chrono::Utc;
use herald_common::{
    BatchFailure, BatchId, BatchUpdate, Email, EmailBatch, EmailId, EmailStatus, EmailUpdate,
    StatusCounts,
};

use crate::{BackingStore, BatchFilter, StoreError, TransitionError};

#[derive(Debug, Clone)]
pub struct BatchTransitions {
    store: Arc<dyn BackingStore>,
}

impl BatchTransitions {
    #[must_use]
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self { store }
    }

    /// Claim a pending batch, counting one attempt.
    ///
    /// # Errors
    /// [`TransitionError::Conflict`] with the current record when the batch
    /// is not `Pending`.
    pub async fn mark_sending(&self, id: BatchId) -> Result<EmailBatch, TransitionError> {
        let update = BatchUpdate::Claim { at: Utc::now() };

        match self.store.update_batch(id, &update).await? {
            Some(batch) => Ok(batch),
            None => Err(TransitionError::Conflict {
                current: Box::new(self.store.read_batch(id).await?),
            }),
        }
    }

    /// Record a successful send. Applying it to a terminal batch is a no-op
    /// that returns the batch as stored.
    pub async fn mark_sent(
        &self,
        id: BatchId,
        attempts: Option<u32>,
        response: Option<String>,
    ) -> Result<EmailBatch, TransitionError> {
        self.settle(
            id,
            &BatchUpdate::Sent {
                at: Utc::now(),
                attempts,
                response,
            },
        )
        .await
    }

    /// Record a failed batch. Applying it to a terminal batch is a no-op
    /// that returns the batch as stored.
    pub async fn mark_failed(
        &self,
        id: BatchId,
        failure: BatchFailure,
        attempts: Option<u32>,
    ) -> Result<EmailBatch, TransitionError> {
        self.settle(
            id,
            &BatchUpdate::Failed {
                at: Utc::now(),
                failure,
                attempts,
            },
        )
        .await
    }

    async fn settle(&self, id: BatchId, update: &BatchUpdate) -> Result<EmailBatch, TransitionError> {
        if let Some(batch) = self.store.update_batch(id, update).await? {
            return Ok(batch);
        }

        let current = self.store.read_batch(id).await?;
        if current.status.is_terminal() {
            tracing::debug!(
                batch_id = %id,
                status = %current.status,
                target = %update.target(),
                "Batch already settled"
            );
            Ok(current)
        } else {
            Err(TransitionError::Conflict {
                current: Box::new(current),
            })
        }
    }

    /// Force a batch back to `Pending`, clearing attempts and errors.
    pub async fn reset_for_retry(&self, id: BatchId) -> crate::Result<EmailBatch> {
        self.store
            .update_batch(id, &BatchUpdate::Reset { at: Utc::now() })
            .await?
            .ok_or_else(|| StoreError::Internal(format!("Unconditional reset of {id} not applied")))
    }
}

#[derive(Debug, Clone)]
pub struct EmailTransitions {
    store: Arc<dyn BackingStore>,
}

impl EmailTransitions {
    #[must_use]
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self { store }
    }

    /// `Queued → Sending`. `None` when the job was not `Queued`.
    pub async fn start(&self, id: EmailId) -> crate::Result<Option<Email>> {
        self.store
            .update_email(
                id,
                Some(&[EmailStatus::Queued]),
                &EmailUpdate::Start { at: Utc::now() },
            )
            .await
    }

    /// Batch counts for a job
    pub async fn counts(&self, id: EmailId) -> crate::Result<StatusCounts> {
        let batches = self.store.list_batches(&BatchFilter::for_email(id)).await?;
        Ok(StatusCounts::tally(batches.iter().map(|batch| batch.status)))
    }

    /// Recompute the job's status from its batches and write it unconditionally.
    pub async fn sync_status(&self, id: EmailId) -> crate::Result<Email> {
        // Surface a missing job before touching batches
        self.store.read_email(id).await?;

        let status = self.counts(id).await?.derive();
        self.force(id, &EmailUpdate::Derived {
            status,
            at: Utc::now(),
        })
        .await
    }

    /// `Sending → Queued` for a job abandoned mid-flight.
    pub async fn reset_stuck(&self, id: EmailId) -> crate::Result<Option<Email>> {
        self.store
            .update_email(
                id,
                Some(&[EmailStatus::Sending]),
                &EmailUpdate::Reset { at: Utc::now() },
            )
            .await
    }

    /// Any status back to `Queued`
    pub async fn reset(&self, id: EmailId) -> crate::Result<Email> {
        self.force(id, &EmailUpdate::Reset { at: Utc::now() }).await
    }

    /// Force `Failed` after an unexpected processing error
    pub async fn fail(&self, id: EmailId) -> crate::Result<Email> {
        self.force(id, &EmailUpdate::Fail { at: Utc::now() }).await
    }

    async fn force(&self, id: EmailId, update: &EmailUpdate) -> crate::Result<Email> {
        self.store
            .update_email(id, None, update)
            .await?
            .ok_or_else(|| StoreError::Internal(format!("Unconditional update of {id} not applied")))
    }
}
