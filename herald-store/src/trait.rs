use async_trait::async_trait;
use herald_common::{
    BatchId, BatchStatus, BatchUpdate, Email, EmailBatch, EmailId, EmailStatus, EmailUpdate,
    audit::AuditEvent,
};

/// Which batches to list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchFilter {
    pub email_id: Option<EmailId>,
    /// Any of these statuses; `None` means all
    pub statuses: Option<Vec<BatchStatus>>,
}

impl BatchFilter {
    #[must_use]
    pub const fn for_email(email_id: EmailId) -> Self {
        Self {
            email_id: Some(email_id),
            statuses: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: BatchStatus) -> Self {
        self.statuses.get_or_insert_with(Vec::new).push(status);
        self
    }

    #[must_use]
    pub fn matches(&self, batch: &EmailBatch) -> bool {
        self.email_id.is_none_or(|id| id == batch.email_id)
            && self
                .statuses
                .as_ref()
                .is_none_or(|statuses| statuses.contains(&batch.status))
    }
}

/// Which audit events to list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditFilter {
    Email(EmailId),
    Batch(BatchId),
}

impl AuditFilter {
    #[must_use]
    pub fn matches(&self, event: &AuditEvent) -> bool {
        match self {
            Self::Email(id) => event.email_id == *id,
            Self::Batch(id) => event.batch_id == Some(*id),
        }
    }
}

/// Persistence for jobs, batches and their audit trail
///
/// Conditional updates are a single compare-and-set: the precondition is
/// checked and the change applied without another writer interleaving.
/// A missed precondition is `Ok(None)`, a missing record is
/// [`StoreError::NotFound`](crate::StoreError::NotFound).
#[async_trait]
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    /// Persist a new job.
    ///
    /// # Errors
    /// If a job with this id already exists, or the store fails
    async fn insert_email(&self, email: &Email) -> crate::Result<()>;

    async fn read_email(&self, id: EmailId) -> crate::Result<Email>;

    /// Apply `update` if the job's status is one of `expected` (or
    /// unconditionally when `expected` is `None`).
    async fn update_email(
        &self,
        id: EmailId,
        expected: Option<&[EmailStatus]>,
        update: &EmailUpdate,
    ) -> crate::Result<Option<Email>>;

    /// Jobs in any of `statuses` (all jobs when `None`), oldest first
    async fn list_emails(&self, statuses: Option<&[EmailStatus]>) -> crate::Result<Vec<Email>>;

    /// Persist new batches. Either all are inserted or none.
    async fn insert_batches(&self, batches: &[EmailBatch]) -> crate::Result<()>;

    async fn read_batch(&self, id: BatchId) -> crate::Result<EmailBatch>;

    /// Apply `update`, guarded by [`BatchUpdate::allowed_from`].
    async fn update_batch(
        &self,
        id: BatchId,
        update: &BatchUpdate,
    ) -> crate::Result<Option<EmailBatch>>;

    /// Batches matching `filter`, oldest first
    async fn list_batches(&self, filter: &BatchFilter) -> crate::Result<Vec<EmailBatch>>;

    async fn append_audit(&self, event: &AuditEvent) -> crate::Result<()>;

    /// Audit events matching `filter`, newest first
    async fn list_audit(&self, filter: AuditFilter) -> crate::Result<Vec<AuditEvent>>;
}
