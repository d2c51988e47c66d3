//! A memory store with adjustable timing and lost races

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use herald_common::{
    BatchId, BatchUpdate, Email, EmailBatch, EmailId, EmailStatus, EmailUpdate, audit::AuditEvent,
};
use herald_store::{AuditFilter, BackingStore, BatchFilter, MemoryBackingStore};

#[derive(Debug, Default)]
pub struct RacyStore {
    inner: MemoryBackingStore,
    /// How long a batch claim takes to come back after it is written
    claim_delay: Duration,
    /// `Queued → Sending` starts still to report a miss without writing
    missed_starts: AtomicUsize,
}

impl RacyStore {
    /// Claims are written immediately but return after `delay`
    pub fn slow_claims(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            claim_delay: delay,
            ..Self::default()
        })
    }

    /// The next `count` job starts lose to a writer that never shows up
    pub fn missing_starts(count: usize) -> Arc<Self> {
        Arc::new(Self {
            missed_starts: AtomicUsize::new(count),
            ..Self::default()
        })
    }
}

#[async_trait]
impl BackingStore for RacyStore {
    async fn insert_email(&self, email: &Email) -> herald_store::Result<()> {
        self.inner.insert_email(email).await
    }

    async fn read_email(&self, id: EmailId) -> herald_store::Result<Email> {
        self.inner.read_email(id).await
    }

    async fn update_email(
        &self,
        id: EmailId,
        expected: Option<&[EmailStatus]>,
        update: &EmailUpdate,
    ) -> herald_store::Result<Option<Email>> {
        if matches!(update, EmailUpdate::Start { .. })
            && self
                .missed_starts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Ok(None);
        }

        self.inner.update_email(id, expected, update).await
    }

    async fn list_emails(
        &self,
        statuses: Option<&[EmailStatus]>,
    ) -> herald_store::Result<Vec<Email>> {
        self.inner.list_emails(statuses).await
    }

    async fn insert_batches(&self, batches: &[EmailBatch]) -> herald_store::Result<()> {
        self.inner.insert_batches(batches).await
    }

    async fn read_batch(&self, id: BatchId) -> herald_store::Result<EmailBatch> {
        self.inner.read_batch(id).await
    }

    async fn update_batch(
        &self,
        id: BatchId,
        update: &BatchUpdate,
    ) -> herald_store::Result<Option<EmailBatch>> {
        let updated = self.inner.update_batch(id, update).await?;

        if matches!(update, BatchUpdate::Claim { .. }) {
            tokio::time::sleep(self.claim_delay).await;
        }

        Ok(updated)
    }

    async fn list_batches(&self, filter: &BatchFilter) -> herald_store::Result<Vec<EmailBatch>> {
        self.inner.list_batches(filter).await
    }

    async fn append_audit(&self, event: &AuditEvent) -> herald_store::Result<()> {
        self.inner.append_audit(event).await
    }

    async fn list_audit(&self, filter: AuditFilter) -> herald_store::Result<Vec<AuditEvent>> {
        self.inner.list_audit(filter).await
    }
}
