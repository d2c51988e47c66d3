//! Control socket for a running herald instance
//!
//! A Unix domain socket carries length-prefixed bincode frames, one request
//! and one response per exchange. Through it an operator can:
//! - Submit, enqueue, process and retry jobs
//! - View a job with its batches, and the audit trail
//! - Run a recovery pass and check the dispatcher's status

pub mod client;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod server;

pub use client::ControlClient;
pub use error::{ControlError, Result};
pub use protocol::{
    AuditCommand, AuditEntry, JobCommand, JobStatus, PROTOCOL_VERSION, RecoveryCommand, Request,
    RequestCommand, Response, ResponseData, ResponsePayload, SystemCommand, SystemStatus,
};
pub use server::{CommandHandler, ControlServer};

/// Default path for the control socket
pub const DEFAULT_CONTROL_SOCKET: &str = "/tmp/herald.sock";
