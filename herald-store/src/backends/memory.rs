use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use herald_common::{
    BatchId, BatchUpdate, Email, EmailBatch, EmailId, EmailStatus, EmailUpdate, audit::AuditEvent,
};

use crate::{
    StoreError,
    r#trait::{AuditFilter, BackingStore, BatchFilter},
};

/// In-memory backing store
///
/// Jobs and batches live in sharded `DashMap`s. A conditional update holds
/// the shard's write lock for the check and the change, so it is a true
/// compare-and-set. Audit events are kept in append order.
///
/// Nothing survives a restart; use [`SqliteBackingStore`](super::SqliteBackingStore)
/// when that matters.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackingStore {
    emails: Arc<DashMap<EmailId, Email>>,
    batches: Arc<DashMap<BatchId, EmailBatch>>,
    audit: Arc<RwLock<Vec<AuditEvent>>>,
}

impl MemoryBackingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs
    #[must_use]
    pub fn len(&self) -> usize {
        self.emails.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn insert_email(&self, email: &Email) -> crate::Result<()> {
        match self.emails.entry(email.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                kind: "Email",
                id: email.id.to_string(),
            }),
            Entry::Vacant(entry) => {
                entry.insert(email.clone());
                Ok(())
            }
        }
    }

    async fn read_email(&self, id: EmailId) -> crate::Result<Email> {
        self.emails
            .get(&id)
            .map(|email| email.clone())
            .ok_or_else(|| StoreError::email_not_found(id))
    }

    async fn update_email(
        &self,
        id: EmailId,
        expected: Option<&[EmailStatus]>,
        update: &EmailUpdate,
    ) -> crate::Result<Option<Email>> {
        let mut email = self
            .emails
            .get_mut(&id)
            .ok_or_else(|| StoreError::email_not_found(id))?;

        if expected.is_some_and(|expected| !expected.contains(&email.status)) {
            return Ok(None);
        }

        email.apply(update);
        Ok(Some(email.clone()))
    }

    async fn list_emails(&self, statuses: Option<&[EmailStatus]>) -> crate::Result<Vec<Email>> {
        let mut emails: Vec<_> = self
            .emails
            .iter()
            .filter(|email| statuses.is_none_or(|statuses| statuses.contains(&email.status)))
            .map(|email| email.clone())
            .collect();

        // ULIDs sort by creation time
        emails.sort_by_key(|email| email.id);

        Ok(emails)
    }

    async fn insert_batches(&self, batches: &[EmailBatch]) -> crate::Result<()> {
        for (inserted, batch) in batches.iter().enumerate() {
            let vacant = match self.batches.entry(batch.id) {
                Entry::Vacant(entry) => {
                    entry.insert(batch.clone());
                    true
                }
                Entry::Occupied(_) => false,
            };

            // The shard guard is released before rolling back
            if !vacant {
                for earlier in &batches[..inserted] {
                    self.batches.remove(&earlier.id);
                }
                return Err(StoreError::AlreadyExists {
                    kind: "Batch",
                    id: batch.id.to_string(),
                });
            }
        }

        Ok(())
    }

    async fn read_batch(&self, id: BatchId) -> crate::Result<EmailBatch> {
        self.batches
            .get(&id)
            .map(|batch| batch.clone())
            .ok_or_else(|| StoreError::batch_not_found(id))
    }

    async fn update_batch(
        &self,
        id: BatchId,
        update: &BatchUpdate,
    ) -> crate::Result<Option<EmailBatch>> {
        let mut batch = self
            .batches
            .get_mut(&id)
            .ok_or_else(|| StoreError::batch_not_found(id))?;

        if !update.permits(batch.status) {
            return Ok(None);
        }

        batch.apply(update);
        Ok(Some(batch.clone()))
    }

    async fn list_batches(&self, filter: &BatchFilter) -> crate::Result<Vec<EmailBatch>> {
        let mut batches: Vec<_> = self
            .batches
            .iter()
            .filter(|batch| filter.matches(batch))
            .map(|batch| batch.clone())
            .collect();

        batches.sort_by_key(|batch| (batch.created_at, batch.id));

        Ok(batches)
    }

    async fn append_audit(&self, event: &AuditEvent) -> crate::Result<()> {
        self.audit.write()?.push(event.clone());
        Ok(())
    }

    async fn list_audit(&self, filter: AuditFilter) -> crate::Result<Vec<AuditEvent>> {
        Ok(self
            .audit
            .read()?
            .iter()
            .rev()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect())
    }
}
