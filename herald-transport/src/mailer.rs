use std::{fmt, time::Duration};

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        client::{Tls, TlsParameters},
    },
};
use serde::Deserialize;

use crate::{AccessToken, OutboundMessage, TransportError, TransportResponse};

/// Hands a validated message to the remote end
#[async_trait]
pub trait Mailer: Send + Sync + fmt::Debug {
    async fn deliver(
        &self,
        message: &OutboundMessage,
        token: &AccessToken,
    ) -> Result<TransportResponse, TransportError>;
}

/// How the SMTP connection is secured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum SmtpSecurity {
    /// TLS from the first byte (port 465)
    Wrapper,
    /// Plain connection upgraded with STARTTLS (port 587)
    #[default]
    StartTls,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub security: SmtpSecurity,

    /// Account the access token belongs to
    pub username: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_port() -> u16 {
    587
}

const fn default_timeout_secs() -> u64 {
    30
}

/// SMTP submission authenticated with XOAUTH2
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Result<Self, TransportError> {
        if config.host.trim().is_empty() {
            return Err(TransportError::NotConfigured(String::from(
                "SMTP host is empty",
            )));
        }
        if config.username.trim().is_empty() {
            return Err(TransportError::NotConfigured(String::from(
                "SMTP username is empty",
            )));
        }

        Ok(Self { config })
    }

    fn transport(&self, token: &AccessToken) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let parameters = TlsParameters::new(self.config.host.clone())
            .map_err(|e| TransportError::NotConfigured(format!("TLS parameters: {e}")))?;
        let tls = match self.config.security {
            SmtpSecurity::Wrapper => Tls::Wrapper(parameters),
            SmtpSecurity::StartTls => Tls::Required(parameters),
        };

        Ok(
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.host)
                .port(self.config.port)
                .tls(tls)
                .timeout(Some(Duration::from_secs(self.config.timeout_secs)))
                .authentication(vec![Mechanism::Xoauth2])
                .credentials(Credentials::new(
                    self.config.username.clone(),
                    token.secret().to_string(),
                ))
                .build(),
        )
    }
}

fn mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address
        .parse()
        .map_err(|e| TransportError::Send(format!("invalid address {address}: {e}")))
}

fn build_message(message: &OutboundMessage) -> Result<Message, TransportError> {
    let mut builder = Message::builder()
        .from(mailbox(&message.from)?)
        .subject(message.subject.as_str());

    for to in &message.to {
        builder = builder.to(mailbox(to)?);
    }

    for bcc in &message.bcc {
        builder = builder.bcc(mailbox(bcc)?);
    }

    builder
        .header(ContentType::TEXT_HTML)
        .body(message.html.clone())
        .map_err(|e| TransportError::Send(format!("failed to build message: {e}")))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(
        &self,
        message: &OutboundMessage,
        token: &AccessToken,
    ) -> Result<TransportResponse, TransportError> {
        let email = build_message(message)?;
        let transport = self.transport(token)?;

        let response = transport
            .send(email)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))?;

        let text = response.message().collect::<Vec<_>>().join(" ");

        Ok(TransportResponse {
            message_id: None,
            response: format!("{} {text}", response.code()),
        })
    }
}
