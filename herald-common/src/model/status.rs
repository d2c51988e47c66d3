use core::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A status string did not name a known status
#[derive(Debug, Error)]
#[error("Unknown status: {0}")]
pub struct UnknownStatus(pub String);

/// Delivery status of a single batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

impl BatchStatus {
    pub const ALL: [Self; 4] = [Self::Pending, Self::Sending, Self::Sent, Self::Failed];

    /// `Sent` and `Failed` are terminal; only a retry reset leaves them.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sending => "SENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }
}

impl Display for BatchStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Status of an announcement job
///
/// `Queued` is the only state a job is created in. Every other state is
/// derived from the job's batches, see [`derive_email_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailStatus {
    Queued,
    Sending,
    Sent,
    Failed,
    /// Some batches sent, some failed, none left in flight
    Processed,
}

impl EmailStatus {
    pub const ALL: [Self; 5] = [
        Self::Queued,
        Self::Sending,
        Self::Sent,
        Self::Failed,
        Self::Processed,
    ];

    /// Statuses in which `completed_at` is stamped
    pub const TERMINAL: [Self; 3] = [Self::Sent, Self::Failed, Self::Processed];

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Processed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Sending => "SENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Processed => "PROCESSED",
        }
    }
}

impl Display for EmailStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Number of batches in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub sending: usize,
    pub sent: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn tally<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = BatchStatus>,
    {
        statuses
            .into_iter()
            .fold(Self::default(), |mut counts, status| {
                match status {
                    BatchStatus::Pending => counts.pending += 1,
                    BatchStatus::Sending => counts.sending += 1,
                    BatchStatus::Sent => counts.sent += 1,
                    BatchStatus::Failed => counts.failed += 1,
                }
                counts
            })
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.sending + self.sent + self.failed
    }

    #[must_use]
    pub const fn in_flight(&self) -> usize {
        self.pending + self.sending
    }

    /// The job status these counts imply.
    ///
    /// A job without batches reads as `Failed`. A job caught mid-creation
    /// therefore looks failed; existing records depend on this, so it stays.
    #[must_use]
    pub const fn derive(&self) -> EmailStatus {
        if self.total() == 0 {
            EmailStatus::Failed
        } else if self.in_flight() > 0 {
            EmailStatus::Sending
        } else if self.failed == 0 {
            EmailStatus::Sent
        } else if self.sent == 0 {
            EmailStatus::Failed
        } else {
            EmailStatus::Processed
        }
    }
}

/// Derive a job's status from the statuses of its batches
pub fn derive_email_status<I>(statuses: I) -> EmailStatus
where
    I: IntoIterator<Item = BatchStatus>,
{
    StatusCounts::tally(statuses).derive()
}
