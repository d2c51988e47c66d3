//! Dispatch engine for announcement emails
//!
//! - [`EmailProcessor`]: drains the [`JobQueue`] and sends each job's batches
//! - [`StatusSync`]: debounced recomputation of a job's status from its batches
//! - [`RecoveryScheduler`]: periodic repair after crashes and restarts
//! - [`AuditTrail`]: non-blocking audit event writer
//! - [`EmailSubmitter`]: validation, chunking and persistence of new jobs

mod audit;
mod config;
mod debounce;
mod error;
mod processor;
mod queue;
mod recovery;
mod service;
mod submit;
mod sync;

pub use audit::AuditTrail;
pub use config::{DispatchConfig, MAX_BATCH_SIZE};
pub use debounce::Debouncer;
pub use error::DispatchError;
pub use processor::{
    BatchOutcome, BatchSummary, DispatchStatus, EmailProcessor, JobView, RetryReport,
};
pub use queue::JobQueue;
pub use recovery::{RecoveryReport, RecoveryScheduler};
pub use service::{DispatchService, Dispatcher};
pub use submit::{EmailSubmitter, MAX_BODY_BYTES, MAX_RECIPIENTS, NewEmail, Submitted};
pub use sync::StatusSync;
