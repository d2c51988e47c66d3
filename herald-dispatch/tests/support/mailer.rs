//! Scriptable transport fakes

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use herald_transport::{
    AccessToken, EmailSendingService, Mailer, OutboundMessage, StaticCredential, TransportError,
    TransportResponse,
};

/// Records every message and fails according to a script
#[derive(Debug, Default)]
pub struct FakeMailer {
    /// Results for the next sends, in order; success once exhausted
    script: Mutex<VecDeque<Result<(), TransportError>>>,
    /// Any message addressed to one of these fails every time
    poisoned: Mutex<Vec<String>>,
    sent: Mutex<Vec<OutboundMessage>>,
    attempts: Mutex<usize>,
}

impl FakeMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(script: impl IntoIterator<Item = Result<(), TransportError>>) -> Arc<Self> {
        let mailer = Self::default();
        *mailer.script.lock().unwrap() = script.into_iter().collect();
        Arc::new(mailer)
    }

    pub fn poison(&self, recipient: &str) {
        self.poisoned.lock().unwrap().push(recipient.to_string());
    }

    pub fn heal(&self) {
        self.poisoned.lock().unwrap().clear();
    }

    /// Messages the transport accepted
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Every delivery attempt, accepted or not
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn deliver(
        &self,
        message: &OutboundMessage,
        _token: &AccessToken,
    ) -> Result<TransportResponse, TransportError> {
        *self.attempts.lock().unwrap() += 1;

        let poisoned = {
            let poisoned = self.poisoned.lock().unwrap();
            message
                .to
                .iter()
                .chain(&message.bcc)
                .any(|recipient| poisoned.contains(recipient))
        };
        if poisoned {
            return Err(TransportError::Send(String::from("550 mailbox unavailable")));
        }

        if let Some(Err(e)) = self.script.lock().unwrap().pop_front() {
            return Err(e);
        }

        self.sent.lock().unwrap().push(message.clone());
        Ok(TransportResponse {
            message_id: Some(String::from("<fake@example.com>")),
            response: String::from("250 2.0.0 OK"),
        })
    }
}

pub fn transport(mailer: Arc<FakeMailer>) -> EmailSendingService {
    EmailSendingService::new(
        Arc::new(StaticCredential::new(AccessToken::new("token"))),
        mailer,
    )
}

pub fn send_failure() -> Result<(), TransportError> {
    Err(TransportError::Send(String::from("421 try again later")))
}
