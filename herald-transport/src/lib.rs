//! Outbound transport for herald
//!
//! [`EmailSendingService`] is the single entry point: it validates a message,
//! obtains a fresh credential from a [`CredentialSource`] and hands the message
//! to a [`Mailer`]. [`EmailSendingService::send_with_retry`] adds bounded
//! exponential backoff on top.

pub mod config;
pub mod credential;
pub mod error;
pub mod mailer;
pub mod message;
pub mod policy;
pub mod service;

pub use config::TransportConfig;
pub use credential::{AccessToken, CredentialSource, OAuthConfig, OAuthRefresher, StaticCredential};
pub use error::TransportError;
pub use mailer::{Mailer, SmtpConfig, SmtpMailer, SmtpSecurity};
pub use message::{OutboundMessage, TransportResponse};
pub use policy::RetryPolicy;
pub use service::{EmailSendingService, SendFailure, SendOutcome};
