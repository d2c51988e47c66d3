//! The announcement job model
//!
//! An [`Email`] is the unit a caller observes; each of its [`EmailBatch`]
//! children is the unit of work and of partial failure. Batches move through
//! `Pending → Sending → {Sent | Failed}` via [`BatchUpdate`]s, and the job's
//! status is derived from its children with [`derive_email_status`].

mod batch;
mod email;
mod id;
mod status;

pub use batch::{BatchFailure, BatchUpdate, DeliveryMode, EmailBatch};
pub use email::{Email, EmailUpdate};
pub use id::{AuditId, BatchId, EmailId, IdParseError};
pub use status::{BatchStatus, EmailStatus, StatusCounts, UnknownStatus, derive_email_status};

/// Longest stored `last_error`, in characters
pub const MAX_ERROR_LEN: usize = 1000;

/// Longest stored `error_code`, in characters
pub const MAX_ERROR_CODE_LEN: usize = 100;

/// Longest stored transport response, in characters
pub const MAX_RESPONSE_LEN: usize = 1000;

/// Truncate `value` to at most `max` characters, respecting char boundaries.
#[must_use]
pub fn cap_len(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}
