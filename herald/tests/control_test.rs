//! The control handler driving a real dispatcher over the memory store
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::unreachable
)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use herald::HeraldControlHandler;
use herald_common::{BatchStatus, EmailStatus, Signal, audit::AuditAction};
use herald_control::{
    AuditCommand, ControlClient, ControlServer, JobCommand, RecoveryCommand, Request,
    RequestCommand, Response, ResponseData, ResponsePayload, SystemCommand,
    server::CommandHandler,
};
use herald_dispatch::{AuditTrail, DispatchConfig, Dispatcher, EmailProcessor, NewEmail};
use herald_store::{BackingStore, MemoryBackingStore};
use herald_transport::{
    AccessToken, EmailSendingService, Mailer, OutboundMessage, StaticCredential, TransportError,
    TransportResponse,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::broadcast;

#[derive(Debug, Default)]
struct AcceptingMailer {
    sends: AtomicUsize,
}

#[async_trait]
impl Mailer for AcceptingMailer {
    async fn deliver(
        &self,
        _message: &OutboundMessage,
        _token: &AccessToken,
    ) -> Result<TransportResponse, TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(TransportResponse {
            message_id: None,
            response: "250 2.0.0 OK".to_string(),
        })
    }
}

struct Fixture {
    dispatcher: Arc<Dispatcher>,
    mailer: Arc<AcceptingMailer>,
    handler: HeraldControlHandler,
}

impl Fixture {
    fn new() -> Self {
        let store: Arc<dyn BackingStore> = Arc::new(MemoryBackingStore::new());
        let mailer = Arc::new(AcceptingMailer::default());
        let transport = EmailSendingService::new(
            Arc::new(StaticCredential::new(AccessToken::new("token"))),
            mailer.clone(),
        );
        let config = DispatchConfig {
            sender: "news@example.com".to_string(),
            batch_size: 2,
            debounce_ms: 10,
            ..DispatchConfig::default()
        };

        let processor = EmailProcessor::new(
            config,
            store.clone(),
            transport,
            AuditTrail::spawn(store, 256),
        )
        .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(processor)));

        Self {
            handler: HeraldControlHandler::new(dispatcher.clone()),
            dispatcher,
            mailer,
        }
    }

    async fn send(&self, request: Request) -> Response {
        self.handler.handle_request(request).await.unwrap()
    }

    async fn job(&self, command: JobCommand) -> Response {
        self.send(Request::new(RequestCommand::Job(command))).await
    }

    async fn submit(&self, recipients: &[&str]) -> String {
        let response = self
            .send(
                Request::new(RequestCommand::Job(JobCommand::Submit(submission(recipients))))
                    .with_actor("ops"),
            )
            .await;
        let ResponseData::Submitted(submitted) = data(response) else {
            panic!("Expected Submitted response");
        };
        submitted.email.id.to_string()
    }
}

fn submission(recipients: &[&str]) -> NewEmail {
    NewEmail {
        subject: "Maintenance window".to_string(),
        body: "<p>Saturday 02:00 UTC</p>".to_string(),
        recipients: recipients.iter().map(ToString::to_string).collect(),
        owner: None,
        mode: None,
    }
}

fn data(response: Response) -> ResponseData {
    match response.payload {
        ResponsePayload::Data(data) => *data,
        other => panic!("Expected Data response, got {other:?}"),
    }
}

fn error_code(response: &Response) -> Option<&str> {
    match &response.payload {
        ResponsePayload::Error { code, .. } => code.as_deref(),
        other => panic!("Expected Error response, got {other:?}"),
    }
}

#[tokio::test]
async fn submit_process_view() {
    let fixture = Fixture::new();
    let id = fixture
        .submit(&["a@example.com", "b@example.com", "c@example.com"])
        .await;

    let ResponseData::JobStatus(status) = data(
        fixture
            .job(JobCommand::Process {
                email_id: id.clone(),
            })
            .await,
    ) else {
        panic!("Expected JobStatus response");
    };
    assert_eq!(status.status, EmailStatus::Sent.to_string());
    assert_eq!(fixture.mailer.sends.load(Ordering::SeqCst), 2);

    let ResponseData::Job(view) = data(fixture.job(JobCommand::View { email_id: id }).await)
    else {
        panic!("Expected Job response");
    };
    assert_eq!(view.email.status, EmailStatus::Sent);
    assert_eq!(view.email.owner.as_deref(), Some("ops"));
    assert_eq!(view.batches.len(), 2);
    assert!(
        view.batches
            .iter()
            .all(|batch| batch.status == BatchStatus::Sent)
    );
}

#[tokio::test]
async fn audit_trail_is_newest_first() {
    let fixture = Fixture::new();
    let id = fixture.submit(&["a@example.com"]).await;
    fixture
        .job(JobCommand::Process {
            email_id: id.clone(),
        })
        .await;
    fixture.dispatcher.processor().audit().flush().await;

    let ResponseData::Audit(entries) = data(
        fixture
            .send(Request::new(RequestCommand::Audit(AuditCommand::Email {
                email_id: id,
            })))
            .await,
    ) else {
        panic!("Expected Audit response");
    };

    let actions: Vec<_> = entries.iter().map(|entry| entry.action).collect();
    assert_eq!(actions.first(), Some(&AuditAction::EmailSent));
    assert_eq!(actions.last(), Some(&AuditAction::EmailQueued));
    assert_eq!(entries.last().unwrap().actor.as_deref(), Some("ops"));

    let batch_id = entries
        .iter()
        .find_map(|entry| entry.batch_id)
        .expect("batch events");
    let ResponseData::Audit(batch_entries) = data(
        fixture
            .send(Request::new(RequestCommand::Audit(AuditCommand::Batch {
                batch_id: batch_id.to_string(),
            })))
            .await,
    ) else {
        panic!("Expected Audit response");
    };
    assert!(
        batch_entries
            .iter()
            .all(|entry| entry.batch_id == Some(batch_id))
    );
    assert_eq!(batch_entries.first().unwrap().action, AuditAction::BatchSent);
}

#[tokio::test]
async fn malformed_id_is_refused() {
    let fixture = Fixture::new();

    let response = fixture
        .job(JobCommand::View {
            email_id: "not-an-id".to_string(),
        })
        .await;

    assert_eq!(error_code(&response), Some("INVALID_ID"));
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let fixture = Fixture::new();

    let response = fixture
        .job(JobCommand::Process {
            email_id: herald_common::EmailId::generate().to_string(),
        })
        .await;

    assert_eq!(error_code(&response), Some("NOT_FOUND"));
}

#[tokio::test]
async fn invalid_submission_is_refused() {
    let fixture = Fixture::new();

    let response = fixture
        .job(JobCommand::Submit(submission(&["not an address"])))
        .await;

    assert_eq!(error_code(&response), Some("VALIDATION_FAILED"));
    assert_eq!(fixture.dispatcher.processor().get_status().queue_length, 0);
}

#[tokio::test]
async fn retry_without_failures_is_refused() {
    let fixture = Fixture::new();
    let id = fixture.submit(&["a@example.com"]).await;
    fixture
        .job(JobCommand::Process {
            email_id: id.clone(),
        })
        .await;

    let response = fixture.job(JobCommand::Retry { email_id: id }).await;

    assert_eq!(error_code(&response), Some("VALIDATION_FAILED"));
}

#[tokio::test]
async fn status_reports_the_queue() {
    let fixture = Fixture::new();
    fixture.submit(&["a@example.com"]).await;
    fixture.submit(&["b@example.com"]).await;

    let ResponseData::SystemStatus(status) = data(
        fixture
            .send(Request::new(RequestCommand::System(SystemCommand::Status)))
            .await,
    ) else {
        panic!("Expected SystemStatus response");
    };

    assert_eq!(status.dispatch.queue_length, 2);
    assert!(status.dispatch.currently_processing.is_empty());
    assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn recovery_run_reports() {
    let fixture = Fixture::new();

    let ResponseData::Recovery(report) = data(
        fixture
            .send(Request::new(RequestCommand::Recovery(RecoveryCommand::Run)))
            .await,
    ) else {
        panic!("Expected Recovery response");
    };

    assert_eq!(report.stuck_emails_reset, 0);
    assert_eq!(report.stuck_batches_reset, 0);
}

#[tokio::test]
async fn round_trip_over_the_socket() {
    let fixture = Fixture::new();
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("herald.sock");
    let socket_str = socket_path.to_str().unwrap().to_string();

    let server = ControlServer::new(
        socket_str.clone(),
        Arc::new(HeraldControlHandler::new(fixture.dispatcher.clone())),
    )
    .unwrap();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server = tokio::spawn(async move { server.serve(shutdown_rx).await });

    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = ControlClient::new(socket_str);
    let response = client
        .send_request(
            Request::new(RequestCommand::Job(JobCommand::Submit(submission(&[
                "a@example.com",
                "b@example.com",
            ]))))
            .with_actor("ops"),
        )
        .await
        .unwrap();
    let ResponseData::Submitted(submitted) = data(response) else {
        panic!("Expected Submitted response");
    };
    assert_eq!(submitted.batches, 1);
    assert!(submitted.queued);

    let response = client
        .send_request(Request::new(RequestCommand::Job(JobCommand::Process {
            email_id: submitted.email.id.to_string(),
        })))
        .await
        .unwrap();
    let ResponseData::JobStatus(status) = data(response) else {
        panic!("Expected JobStatus response");
    };
    assert_eq!(status.email_id, submitted.email.id);
    assert_eq!(status.status, "SENT");

    shutdown_tx.send(Signal::Shutdown).unwrap();
    server.await.unwrap().unwrap();
}
