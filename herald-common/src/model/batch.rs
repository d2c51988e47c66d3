use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    BatchId, BatchStatus, EmailId, MAX_ERROR_CODE_LEN, MAX_ERROR_LEN, MAX_RESPONSE_LEN, cap_len,
};

/// How a batch's recipients are addressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMode {
    /// Recipients go in the `To` header
    Individual,
    /// `To` is the sender, recipients are blind copied
    #[default]
    Bcc,
}

/// One transport call's worth of recipients belonging to an [`Email`](super::Email)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailBatch {
    pub id: BatchId,
    pub email_id: EmailId,
    pub recipients: Vec<String>,
    pub mode: DeliveryMode,
    pub status: BatchStatus,
    /// Send attempts made so far; never decreases except on reset
    pub attempts: u32,
    pub last_attempted_at: Option<DateTime<Utc>>,
    /// Set iff the status is `Sent`
    pub sent_at: Option<DateTime<Utc>>,
    /// Set iff the status is `Failed`
    pub failed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_code: Option<String>,
    /// Transport response for the successful send
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmailBatch {
    #[must_use]
    pub fn new(email_id: EmailId, recipients: Vec<String>, mode: DeliveryMode) -> Self {
        let now = Utc::now();

        Self {
            id: BatchId::generate(),
            email_id,
            recipients,
            mode,
            status: BatchStatus::Pending,
            attempts: 0,
            last_attempted_at: None,
            sent_at: None,
            failed_at: None,
            last_error: None,
            error_code: None,
            response: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply `update` in place. Preconditions are the store's concern.
    pub fn apply(&mut self, update: &BatchUpdate) {
        match update {
            BatchUpdate::Claim { at } => {
                self.status = BatchStatus::Sending;
                self.attempts = self.attempts.saturating_add(1);
                self.last_attempted_at = Some(*at);
            }
            BatchUpdate::Sent {
                at,
                attempts,
                response,
            } => {
                self.status = BatchStatus::Sent;
                if let Some(attempts) = attempts {
                    self.attempts = self.attempts.max(*attempts);
                }
                self.sent_at = Some(*at);
                self.failed_at = None;
                self.response = response.as_deref().map(|r| cap_len(r, MAX_RESPONSE_LEN));
            }
            BatchUpdate::Failed {
                at,
                failure,
                attempts,
            } => {
                self.status = BatchStatus::Failed;
                if let Some(attempts) = attempts {
                    self.attempts = self.attempts.max(*attempts);
                }
                self.failed_at = Some(*at);
                self.sent_at = None;
                self.last_error = Some(failure.message.clone());
                self.error_code = failure.code.clone();
            }
            BatchUpdate::Reset { .. } => {
                self.status = BatchStatus::Pending;
                self.attempts = 0;
                self.last_attempted_at = None;
                self.sent_at = None;
                self.failed_at = None;
                self.last_error = None;
                self.error_code = None;
                self.response = None;
            }
        }

        self.updated_at = update.at();
    }

    #[must_use]
    pub fn with(mut self, update: &BatchUpdate) -> Self {
        self.apply(update);
        self
    }
}

/// Why a batch failed, with both fields already capped to their stored length
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub message: String,
    pub code: Option<String>,
}

impl BatchFailure {
    #[must_use]
    pub fn new(message: &str, code: Option<&str>) -> Self {
        Self {
            message: cap_len(message, MAX_ERROR_LEN),
            code: code.map(|code| cap_len(code, MAX_ERROR_CODE_LEN)),
        }
    }
}

/// A transition of an [`EmailBatch`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchUpdate {
    /// `Pending → Sending`, counting one attempt
    Claim { at: DateTime<Utc> },
    /// `Sending → Sent`
    Sent {
        at: DateTime<Utc>,
        attempts: Option<u32>,
        response: Option<String>,
    },
    /// `Pending | Sending → Failed`
    Failed {
        at: DateTime<Utc>,
        failure: BatchFailure,
        attempts: Option<u32>,
    },
    /// Any status back to `Pending` with counters cleared
    Reset { at: DateTime<Utc> },
}

impl BatchUpdate {
    const CLAIM_FROM: &'static [BatchStatus] = &[BatchStatus::Pending];
    const SENT_FROM: &'static [BatchStatus] = &[BatchStatus::Sending];
    const FAILED_FROM: &'static [BatchStatus] = &[BatchStatus::Pending, BatchStatus::Sending];

    #[must_use]
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Claim { at } | Self::Sent { at, .. } | Self::Failed { at, .. } | Self::Reset { at } => {
                *at
            }
        }
    }

    #[must_use]
    pub const fn target(&self) -> BatchStatus {
        match self {
            Self::Claim { .. } => BatchStatus::Sending,
            Self::Sent { .. } => BatchStatus::Sent,
            Self::Failed { .. } => BatchStatus::Failed,
            Self::Reset { .. } => BatchStatus::Pending,
        }
    }

    /// Statuses this update may be applied from; `None` means any.
    #[must_use]
    pub const fn allowed_from(&self) -> Option<&'static [BatchStatus]> {
        match self {
            Self::Claim { .. } => Some(Self::CLAIM_FROM),
            Self::Sent { .. } => Some(Self::SENT_FROM),
            Self::Failed { .. } => Some(Self::FAILED_FROM),
            Self::Reset { .. } => None,
        }
    }

    #[must_use]
    pub fn permits(&self, current: BatchStatus) -> bool {
        self.allowed_from()
            .is_none_or(|allowed| allowed.contains(&current))
    }
}
