#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

pub mod mailer;
pub mod store;

use std::sync::Arc;

use herald_common::{EmailId, audit::AuditAction};
use herald_dispatch::{
    AuditTrail, DispatchConfig, Dispatcher, EmailProcessor, NewEmail, Submitted,
};
use herald_store::{AuditFilter, BackingStore, MemoryBackingStore};

pub use self::{
    mailer::{FakeMailer, send_failure, transport},
    store::RacyStore,
};

pub const SENDER: &str = "news@example.com";

pub fn config() -> DispatchConfig {
    DispatchConfig {
        sender: SENDER.to_string(),
        batch_size: 2,
        initial_retry_delay_ms: 100,
        debounce_ms: 50,
        ..DispatchConfig::default()
    }
}

pub struct Harness {
    pub store: Arc<dyn BackingStore>,
    pub mailer: Arc<FakeMailer>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new(config: DispatchConfig, mailer: Arc<FakeMailer>) -> Self {
        Self::with_store(config, mailer, Arc::new(MemoryBackingStore::new()))
    }

    /// A fresh processor over an existing store, as after a restart
    pub fn with_store(
        config: DispatchConfig,
        mailer: Arc<FakeMailer>,
        store: Arc<dyn BackingStore>,
    ) -> Self {
        let audit = AuditTrail::spawn(store.clone(), 256);
        let processor = EmailProcessor::new(config, store.clone(), transport(mailer.clone()), audit)
            .expect("valid config");

        Self {
            store,
            mailer,
            dispatcher: Dispatcher::new(Arc::new(processor)),
        }
    }

    pub fn processor(&self) -> &Arc<EmailProcessor> {
        self.dispatcher.processor()
    }

    pub async fn submit(&self, recipients: &[&str]) -> Submitted {
        self.dispatcher
            .submitter()
            .submit(NewEmail {
                subject: String::from("Release notes"),
                body: String::from("<p>New things</p>"),
                recipients: recipients.iter().map(ToString::to_string).collect(),
                owner: Some(String::from("ops@example.com")),
                mode: None,
            })
            .await
            .expect("submission is valid")
    }

    /// Audit actions for a job, oldest first
    pub async fn actions(&self, id: EmailId) -> Vec<AuditAction> {
        self.processor().audit().flush().await;
        let mut events = self
            .store
            .list_audit(AuditFilter::Email(id))
            .await
            .expect("list audit");
        events.reverse();
        events.into_iter().map(|event| event.action).collect()
    }

    pub async fn count(&self, id: EmailId, action: AuditAction) -> usize {
        self.actions(id)
            .await
            .into_iter()
            .filter(|a| *a == action)
            .count()
    }
}
