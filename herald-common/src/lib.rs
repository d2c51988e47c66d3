//! Types shared by every herald crate
//!
//! - [`model`]: the `Email` job, its `EmailBatch` children and the status
//!   machines that govern them
//! - [`audit`]: audit events and their structured log emission
//! - [`logging`]: subscriber setup and the `internal!` family of macros

pub mod audit;
pub mod logging;
pub mod model;

pub use model::{
    AuditId, BatchFailure, BatchId, BatchStatus, BatchUpdate, DeliveryMode, Email, EmailBatch,
    EmailId, EmailStatus, EmailUpdate, IdParseError, StatusCounts, UnknownStatus,
    derive_email_status,
};
pub use tracing;

#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
    Finalised,
}
