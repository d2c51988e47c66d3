use std::sync::Arc;

use serde::Deserialize;

use crate::{EmailSendingService, OAuthConfig, OAuthRefresher, SmtpConfig, SmtpMailer};

/// Transport settings
///
/// ```ron
/// transport: (
///     smtp: Some((
///         host: "smtp.gmail.com",
///         port: 465,
///         security: Wrapper,
///         username: "news@example.com",
///     )),
///     oauth: Some((
///         token_url: "https://oauth2.googleapis.com/token",
///         client_id: "env:HERALD_OAUTH_CLIENT_ID",
///         client_secret: "env:HERALD_OAUTH_CLIENT_SECRET",
///         refresh_token: "env:HERALD_OAUTH_REFRESH_TOKEN",
///     )),
/// )
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,

    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
}

impl TransportConfig {
    /// Build the sending service.
    ///
    /// Incomplete settings do not stop the process: the returned service
    /// fails each send with `NOT_CONFIGURED` instead.
    #[must_use]
    pub fn build(&self) -> EmailSendingService {
        let (Some(smtp), Some(oauth)) = (&self.smtp, &self.oauth) else {
            tracing::warn!("Transport settings are incomplete, sends will fail");
            return EmailSendingService::unconfigured("smtp and oauth settings are required");
        };

        let credentials = match OAuthRefresher::new(oauth) {
            Ok(credentials) => credentials,
            Err(e) => {
                tracing::warn!(error = %e, "OAuth settings are unusable, sends will fail");
                return EmailSendingService::unconfigured(e.to_string());
            }
        };

        let mailer = match SmtpMailer::new(smtp.clone()) {
            Ok(mailer) => mailer,
            Err(e) => {
                tracing::warn!(error = %e, "SMTP settings are unusable, sends will fail");
                return EmailSendingService::unconfigured(e.to_string());
            }
        };

        EmailSendingService::new(Arc::new(credentials), Arc::new(mailer))
    }
}
