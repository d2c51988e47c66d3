//! Fire-and-forget audit writer

use std::sync::Arc;

use herald_common::audit::{AuditEvent, log_event};
use herald_store::BackingStore;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug)]
enum Command {
    Record(Box<AuditEvent>),
    Flush(oneshot::Sender<()>),
}

/// Hands audit events to a background writer
///
/// Recording never blocks and never fails the caller. Events that cannot
/// be queued or stored are logged and dropped.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    tx: mpsc::Sender<Command>,
}

impl AuditTrail {
    /// Start the writer task. Must be called from within a Tokio runtime.
    ///
    /// The writer stops once every clone of the returned trail is dropped.
    #[must_use]
    pub fn spawn(store: Arc<dyn BackingStore>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(write_events(store, rx));
        Self { tx }
    }

    pub fn record(&self, event: AuditEvent) {
        log_event(&event);

        if let Err(e) = self.tx.try_send(Command::Record(Box::new(event))) {
            let (reason, event) = match e {
                mpsc::error::TrySendError::Full(command) => ("channel full", command),
                mpsc::error::TrySendError::Closed(command) => ("writer stopped", command),
            };

            if let Command::Record(event) = event {
                tracing::warn!(
                    email_id = %event.email_id,
                    action = %event.action,
                    reason,
                    "Dropping audit event"
                );
            }

            if let Some(metrics) = herald_metrics::metrics() {
                metrics.dispatch.record_audit_dropped();
            }
        }
    }

    /// Wait until everything recorded before this call has been written
    pub async fn flush(&self) {
        let (done, written) = oneshot::channel();

        if self.tx.send(Command::Flush(done)).await.is_ok() {
            let _ = written.await;
        }
    }
}

async fn write_events(store: Arc<dyn BackingStore>, mut rx: mpsc::Receiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Record(event) => {
                if let Err(e) = store.append_audit(&event).await {
                    tracing::warn!(
                        email_id = %event.email_id,
                        action = %event.action,
                        error = %e,
                        "Failed to store audit event"
                    );
                }
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    tracing::debug!("Audit writer stopped");
}
