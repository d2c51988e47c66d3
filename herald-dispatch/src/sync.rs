use std::time::Duration;

use herald_common::{Email, EmailId};
use herald_store::EmailTransitions;

use crate::debounce::Debouncer;

/// Recomputes a job's status from its batches after they settle
///
/// Batch completions for the same job within the debounce window collapse
/// into a single write.
#[derive(Debug, Clone)]
pub struct StatusSync {
    emails: EmailTransitions,
    debouncer: Debouncer<EmailId>,
}

impl StatusSync {
    #[must_use]
    pub fn new(emails: EmailTransitions, window: Duration) -> Self {
        Self {
            emails,
            debouncer: Debouncer::new(window),
        }
    }

    /// Recompute `id` once the window passes without another schedule.
    pub fn schedule(&self, id: EmailId) {
        let sync = self.clone();
        self.debouncer.schedule(id, move || async move {
            if let Err(e) = sync.sync_now(id).await {
                tracing::warn!(email_id = %id, error = %e, "Failed to sync email status");
            }
        });
    }

    /// Drop a waiting recomputation for `id`
    pub fn cancel(&self, id: EmailId) {
        self.debouncer.cancel(&id);
    }

    #[must_use]
    pub fn is_pending(&self, id: EmailId) -> bool {
        self.debouncer.is_pending(&id)
    }

    /// Recompute and persist `id`'s status right away.
    ///
    /// A job that no longer exists is not an error; `None` is returned.
    pub async fn sync_now(&self, id: EmailId) -> herald_store::Result<Option<Email>> {
        match self.emails.sync_status(id).await {
            Ok(email) => {
                tracing::debug!(email_id = %id, status = %email.status, "Synced email status");
                Ok(Some(email))
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(email_id = %id, "Email gone before its status was synced");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
