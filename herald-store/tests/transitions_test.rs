#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use herald_common::{
    BatchFailure, BatchStatus, DeliveryMode, Email, EmailBatch, EmailStatus,
};
use herald_store::{
    BackingStore, BatchTransitions, EmailTransitions, MemoryBackingStore, SqliteBackingStore,
    TransitionError,
};
use pretty_assertions::assert_eq;

async fn stores() -> Vec<Arc<dyn BackingStore>> {
    vec![
        Arc::new(MemoryBackingStore::new()),
        Arc::new(SqliteBackingStore::in_memory().await.expect("open sqlite")),
    ]
}

async fn seed(store: &Arc<dyn BackingStore>, batches: usize) -> (Email, Vec<EmailBatch>) {
    let email = Email::new("Subject", "<p>Body</p>", None);
    store.insert_email(&email).await.expect("insert email");

    let batches: Vec<_> = (0..batches)
        .map(|i| {
            EmailBatch::new(
                email.id,
                vec![format!("user{i}@example.com")],
                DeliveryMode::Bcc,
            )
        })
        .collect();
    store.insert_batches(&batches).await.expect("insert batches");

    (email, batches)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_have_one_winner() {
    for store in stores().await {
        let (_, batches) = seed(&store, 1).await;
        let id = batches[0].id;
        let transitions = BatchTransitions::new(store.clone());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let transitions = transitions.clone();
                tokio::spawn(async move { transitions.mark_sending(id).await })
            })
            .collect();

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.expect("join") {
                Ok(batch) => {
                    wins += 1;
                    assert_eq!(batch.status, BatchStatus::Sending);
                }
                Err(TransitionError::Conflict { current }) => {
                    conflicts += 1;
                    assert_eq!(current.status, BatchStatus::Sending);
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(wins, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(store.read_batch(id).await.expect("read").attempts, 1);
    }
}

#[tokio::test]
async fn settling_twice_equals_once() {
    for store in stores().await {
        let (_, batches) = seed(&store, 2).await;
        let transitions = BatchTransitions::new(store.clone());

        let sent_id = batches[0].id;
        transitions.mark_sending(sent_id).await.expect("claim");
        let first = transitions
            .mark_sent(sent_id, Some(2), Some(String::from("250 OK")))
            .await
            .expect("sent");
        let second = transitions
            .mark_sent(sent_id, Some(5), None)
            .await
            .expect("sent again");
        assert_eq!(first, second);

        let failed_id = batches[1].id;
        let failure = BatchFailure::new("rejected", Some("SEND_FAILED"));
        let first = transitions
            .mark_failed(failed_id, failure.clone(), Some(3))
            .await
            .expect("failed");
        let second = transitions
            .mark_failed(failed_id, failure, Some(3))
            .await
            .expect("failed again");
        assert_eq!(first, second);
        assert!(first.sent_at.is_none());

        // a failed batch cannot later be marked sent
        let after = transitions
            .mark_sent(failed_id, None, None)
            .await
            .expect("no-op");
        assert_eq!(after.status, BatchStatus::Failed);
    }
}

#[tokio::test]
async fn sent_requires_sending() {
    for store in stores().await {
        let (_, batches) = seed(&store, 1).await;
        let transitions = BatchTransitions::new(store.clone());

        let err = transitions
            .mark_sent(batches[0].id, None, None)
            .await
            .expect_err("pending batch cannot be sent");
        assert_eq!(
            err.current().map(|batch| batch.status),
            Some(BatchStatus::Pending)
        );
    }
}

#[tokio::test]
async fn only_reset_lowers_attempts() {
    for store in stores().await {
        let (_, batches) = seed(&store, 1).await;
        let id = batches[0].id;
        let transitions = BatchTransitions::new(store.clone());

        transitions.mark_sending(id).await.expect("claim");
        let failed = transitions
            .mark_failed(id, BatchFailure::new("timeout", Some("SEND_FAILED")), Some(3))
            .await
            .expect("fail");
        assert_eq!(failed.attempts, 3);

        // a lower attempt count never wins
        let failed = transitions
            .mark_failed(id, BatchFailure::new("timeout", None), Some(1))
            .await
            .expect("fail again");
        assert_eq!(failed.attempts, 3);

        let reset = transitions.reset_for_retry(id).await.expect("reset");
        assert_eq!(reset.status, BatchStatus::Pending);
        assert_eq!(reset.attempts, 0);
        assert!(reset.error_code.is_none());
        assert!(reset.failed_at.is_none());
    }
}

#[tokio::test]
async fn sync_status_derives_from_batches() {
    for store in stores().await {
        let (email, batches) = seed(&store, 2).await;
        let batch_transitions = BatchTransitions::new(store.clone());
        let email_transitions = EmailTransitions::new(store.clone());

        let started = email_transitions.start(email.id).await.expect("start");
        assert_eq!(started.map(|e| e.status), Some(EmailStatus::Sending));
        assert!(email_transitions.start(email.id).await.expect("start").is_none());

        batch_transitions.mark_sending(batches[0].id).await.expect("claim");
        batch_transitions
            .mark_sent(batches[0].id, Some(1), None)
            .await
            .expect("sent");

        let synced = email_transitions.sync_status(email.id).await.expect("sync");
        assert_eq!(synced.status, EmailStatus::Sending);
        assert!(synced.completed_at.is_none());

        batch_transitions
            .mark_failed(batches[1].id, BatchFailure::new("no", None), None)
            .await
            .expect("fail");

        let synced = email_transitions.sync_status(email.id).await.expect("sync");
        assert_eq!(synced.status, EmailStatus::Processed);
        assert!(synced.completed_at.is_some());

        let reset = email_transitions.reset(email.id).await.expect("reset");
        assert_eq!(reset.status, EmailStatus::Queued);
        assert!(reset.started_at.is_none());
        assert!(reset.completed_at.is_none());
    }
}

#[tokio::test]
async fn email_without_batches_reads_failed() {
    for store in stores().await {
        let email = Email::new("Subject", "Body", None);
        store.insert_email(&email).await.expect("insert");

        let synced = EmailTransitions::new(store.clone())
            .sync_status(email.id)
            .await
            .expect("sync");
        assert_eq!(synced.status, EmailStatus::Failed);
    }
}
