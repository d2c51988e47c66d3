use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EmailId, EmailStatus};

/// An announcement job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub id: EmailId,
    pub subject: String,
    /// HTML body
    pub body: String,
    /// Who submitted the job, if known
    pub owner: Option<String>,
    pub status: EmailStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when a processor first picks the job up
    pub started_at: Option<DateTime<Utc>>,
    /// Set iff the status is terminal
    pub completed_at: Option<DateTime<Utc>>,
}

impl Email {
    /// A freshly submitted job, in `Queued`
    #[must_use]
    pub fn new(subject: impl Into<String>, body: impl Into<String>, owner: Option<String>) -> Self {
        let now = Utc::now();

        Self {
            id: EmailId::generate(),
            subject: subject.into(),
            body: body.into(),
            owner,
            status: EmailStatus::Queued,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply `update` in place. Preconditions are the store's concern.
    pub fn apply(&mut self, update: &EmailUpdate) {
        match *update {
            EmailUpdate::Start { at } => {
                self.status = EmailStatus::Sending;
                self.started_at = Some(at);
                self.completed_at = None;
                self.updated_at = at;
            }
            EmailUpdate::Derived { status, at } => {
                self.status = status;
                if status != EmailStatus::Queued && self.started_at.is_none() {
                    self.started_at = Some(at);
                }
                self.completed_at = status.is_terminal().then_some(at);
                self.updated_at = at;
            }
            EmailUpdate::Reset { at } => {
                self.status = EmailStatus::Queued;
                self.started_at = None;
                self.completed_at = None;
                self.updated_at = at;
            }
            EmailUpdate::Fail { at } => {
                self.status = EmailStatus::Failed;
                self.completed_at = Some(at);
                self.updated_at = at;
            }
        }
    }

    /// Copy of `self` with `update` applied
    #[must_use]
    pub fn with(mut self, update: &EmailUpdate) -> Self {
        self.apply(update);
        self
    }
}

/// A change to a job's status and its timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmailUpdate {
    /// A processor claimed the job
    Start { at: DateTime<Utc> },
    /// Status recomputed from the job's batches
    Derived {
        status: EmailStatus,
        at: DateTime<Utc>,
    },
    /// Back to `Queued`, for recovery or a retry
    Reset { at: DateTime<Utc> },
    /// Processing aborted on an unexpected error
    Fail { at: DateTime<Utc> },
}

impl EmailUpdate {
    #[must_use]
    pub fn at(&self) -> DateTime<Utc> {
        match *self {
            Self::Start { at } | Self::Derived { at, .. } | Self::Reset { at } | Self::Fail { at } => at,
        }
    }

    /// Status the job holds after this update
    #[must_use]
    pub const fn target(&self) -> EmailStatus {
        match *self {
            Self::Start { .. } => EmailStatus::Sending,
            Self::Derived { status, .. } => status,
            Self::Reset { .. } => EmailStatus::Queued,
            Self::Fail { .. } => EmailStatus::Failed,
        }
    }
}
