//! Full request/response cycles between the control client and server
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::panic,
    clippy::unreachable
)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use herald_common::{
    Email, EmailId, Signal,
    audit::{AuditAction, AuditEvent},
};
use herald_control::{
    AuditCommand, AuditEntry, ControlClient, ControlError, ControlServer, JobCommand,
    PROTOCOL_VERSION, Request, RequestCommand, Response, ResponseData, ResponsePayload, Result,
    SystemCommand, SystemStatus, server::CommandHandler,
};
use herald_dispatch::{DispatchStatus, NewEmail, RetryReport, Submitted};
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Answers from canned data
struct MockHandler;

#[async_trait]
impl CommandHandler for MockHandler {
    async fn handle_request(&self, request: Request) -> Result<Response> {
        match request.command {
            RequestCommand::System(SystemCommand::Ping) => {
                Ok(Response::data(ResponseData::Message("pong".to_string())))
            }
            RequestCommand::System(SystemCommand::Status) => {
                Ok(Response::data(ResponseData::SystemStatus(SystemStatus {
                    version: "0.1.0".to_string(),
                    uptime_secs: 42,
                    dispatch: DispatchStatus {
                        queue_length: 2,
                        currently_processing: vec![EmailId::generate()],
                        processing_batches: Vec::new(),
                    },
                })))
            }
            RequestCommand::Job(JobCommand::Submit(NewEmail {
                subject,
                body,
                recipients,
                owner,
                ..
            })) => {
                let email = Email::new(subject, body, owner);
                Ok(Response::data(ResponseData::Submitted(Box::new(
                    Submitted {
                        email,
                        batches: recipients.len().div_ceil(2),
                        queued: true,
                    },
                ))))
            }
            RequestCommand::Job(JobCommand::Retry { .. }) => match request.actor {
                Some(_) => Ok(Response::data(ResponseData::Retry(RetryReport {
                    batches_reset: 1,
                    queued: true,
                }))),
                None => Ok(Response::error_with_code(
                    "VALIDATION_FAILED",
                    "retry needs an actor",
                )),
            },
            RequestCommand::Job(JobCommand::View { email_id }) => Ok(Response::error_with_code(
                "NOT_FOUND",
                format!("Email {email_id} not found"),
            )),
            RequestCommand::Audit(AuditCommand::Email { email_id }) => {
                let email_id = email_id.parse().expect("valid id");
                let event = AuditEvent::builder(email_id, AuditAction::EmailQueued)
                    .details("Email queued")
                    .metadata(json!({ "batches": 3 }))
                    .build();
                Ok(Response::data(ResponseData::Audit(vec![AuditEntry::from(
                    &event,
                )])))
            }
            _ => Ok(Response::error("not implemented in mock")),
        }
    }
}

async fn start_test_server(
    socket_path: &str,
) -> (tokio::task::JoinHandle<()>, broadcast::Sender<Signal>) {
    let server =
        ControlServer::new(socket_path, Arc::new(MockHandler)).expect("Failed to create server");
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(shutdown_rx).await {
            eprintln!("Server error: {e}");
        }
    });

    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(100)).await;

    (server_handle, shutdown_tx)
}

fn data(response: Response) -> ResponseData {
    match response.payload {
        ResponsePayload::Data(data) => *data,
        other => panic!("Expected Data response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_system_ping() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");
    let socket_str = socket_path.to_str().unwrap();
    let (_server, _shutdown) = start_test_server(socket_str).await;

    let client = ControlClient::new(socket_str);
    let response = client
        .send_request(Request::new(RequestCommand::System(SystemCommand::Ping)))
        .await
        .unwrap();

    assert_eq!(response.version, PROTOCOL_VERSION);
    let ResponseData::Message(message) = data(response) else {
        panic!("Expected Message response");
    };
    assert_eq!(message, "pong");
}

#[tokio::test]
async fn test_system_status() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");
    let socket_str = socket_path.to_str().unwrap();
    let (_server, _shutdown) = start_test_server(socket_str).await;

    let client = ControlClient::new(socket_str);
    let response = client
        .send_request(Request::new(RequestCommand::System(SystemCommand::Status)))
        .await
        .unwrap();

    let ResponseData::SystemStatus(status) = data(response) else {
        panic!("Expected SystemStatus response");
    };
    assert_eq!(status.uptime_secs, 42);
    assert_eq!(status.dispatch.queue_length, 2);
    assert_eq!(status.dispatch.currently_processing.len(), 1);
}

#[tokio::test]
async fn test_submit_carries_job_across_the_socket() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");
    let socket_str = socket_path.to_str().unwrap();
    let (_server, _shutdown) = start_test_server(socket_str).await;

    let client = ControlClient::new(socket_str);
    let request = Request::new(RequestCommand::Job(JobCommand::Submit(NewEmail {
        subject: "Launch".to_string(),
        body: "<p>We are live</p>".to_string(),
        recipients: vec![
            "a@example.com".to_string(),
            "b@example.com".to_string(),
            "c@example.com".to_string(),
        ],
        owner: Some("ops".to_string()),
        mode: None,
    })));

    let ResponseData::Submitted(submitted) = data(client.send_request(request).await.unwrap())
    else {
        panic!("Expected Submitted response");
    };
    assert_eq!(submitted.email.subject, "Launch");
    assert_eq!(submitted.email.owner.as_deref(), Some("ops"));
    assert_eq!(submitted.batches, 2);
    assert!(submitted.queued);
}

#[tokio::test]
async fn test_actor_reaches_the_handler() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");
    let socket_str = socket_path.to_str().unwrap();
    let (_server, _shutdown) = start_test_server(socket_str).await;

    let client = ControlClient::new(socket_str);
    let command = || {
        RequestCommand::Job(JobCommand::Retry {
            email_id: EmailId::generate().to_string(),
        })
    };

    let response = client
        .send_request(Request::new(command()).with_actor("ops"))
        .await
        .unwrap();
    let ResponseData::Retry(report) = data(response) else {
        panic!("Expected Retry response");
    };
    assert_eq!(report.batches_reset, 1);

    let err = client
        .send_request(Request::new(command()))
        .await
        .expect_err("no actor");
    assert!(matches!(
        err,
        ControlError::ServerError { code: Some(ref code), .. } if code == "VALIDATION_FAILED"
    ));
}

#[tokio::test]
async fn test_server_error_keeps_its_code() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");
    let socket_str = socket_path.to_str().unwrap();
    let (_server, _shutdown) = start_test_server(socket_str).await;

    let client = ControlClient::new(socket_str);
    let err = client
        .send_request(Request::new(RequestCommand::Job(JobCommand::View {
            email_id: "missing".to_string(),
        })))
        .await
        .expect_err("not found");

    match err {
        ControlError::ServerError { code, message } => {
            assert_eq!(code.as_deref(), Some("NOT_FOUND"));
            assert!(message.contains("missing"));
        }
        other => panic!("Expected ServerError, got {other:?}"),
    }
}

#[tokio::test]
async fn test_audit_entries_cross_the_socket() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");
    let socket_str = socket_path.to_str().unwrap();
    let (_server, _shutdown) = start_test_server(socket_str).await;

    let client = ControlClient::new(socket_str);
    let email_id = EmailId::generate();
    let response = client
        .send_request(Request::new(RequestCommand::Audit(AuditCommand::Email {
            email_id: email_id.to_string(),
        })))
        .await
        .unwrap();

    let ResponseData::Audit(entries) = data(response) else {
        panic!("Expected Audit response");
    };
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].email_id, email_id);
    assert_eq!(entries[0].action, AuditAction::EmailQueued);
    assert_eq!(entries[0].metadata, r#"{"batches":3}"#);
}

#[tokio::test]
async fn test_incompatible_version_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");
    let socket_str = socket_path.to_str().unwrap();
    let (_server, _shutdown) = start_test_server(socket_str).await;

    let client = ControlClient::new(socket_str);
    let mut request = Request::new(RequestCommand::System(SystemCommand::Ping));
    request.version = PROTOCOL_VERSION + 1;

    let err = client.send_request(request).await.expect_err("rejected");
    assert!(matches!(
        err,
        ControlError::ServerError { code: Some(ref code), .. } if code == "INCOMPATIBLE_VERSION"
    ));
}

#[tokio::test]
async fn test_persistent_connection_serves_many_requests() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");
    let socket_str = socket_path.to_str().unwrap();
    let (_server, _shutdown) = start_test_server(socket_str).await;

    let client = ControlClient::new(socket_str).with_persistent_connection();
    for _ in 0..3 {
        let response = client
            .send_request(Request::new(RequestCommand::System(SystemCommand::Ping)))
            .await
            .unwrap();
        assert!(response.is_success());
    }
}

#[tokio::test]
async fn test_socket_not_exist_error() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("nonexistent.sock");
    let socket_str = socket_path.to_str().unwrap();

    let client = ControlClient::new(socket_str);
    assert!(client.check_socket_exists().is_err());

    let result = client
        .send_request(Request::new(RequestCommand::System(SystemCommand::Ping)))
        .await;
    assert!(matches!(result, Err(ControlError::Io(_))));
}

#[tokio::test]
async fn test_shutdown_removes_socket() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");
    let socket_str = socket_path.to_str().unwrap();
    let (server, shutdown) = start_test_server(socket_str).await;

    assert!(socket_path.exists());

    shutdown.send(Signal::Shutdown).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server stops")
        .unwrap();

    assert!(!socket_path.exists());
}

#[tokio::test]
async fn test_second_server_refuses_live_socket() {
    let temp_dir = TempDir::new().unwrap();
    let socket_path = temp_dir.path().join("test.sock");
    let socket_str = socket_path.to_str().unwrap();
    let (_server, _shutdown) = start_test_server(socket_str).await;

    let second = ControlServer::new(socket_str, Arc::new(MockHandler)).unwrap();
    let (_tx, rx) = broadcast::channel(1);
    let err = second.serve(rx).await.expect_err("address in use");

    assert!(matches!(err, ControlError::Io(ref e) if e.kind() == std::io::ErrorKind::AddrInUse));
}
