//! In-process job queue

use std::{collections::VecDeque, sync::Arc};

use herald_common::EmailId;
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug)]
struct Inner {
    capacity: usize,
    jobs: Mutex<VecDeque<EmailId>>,
    notify: Notify,
}

/// Bounded FIFO of job ids waiting for the worker
///
/// A job already waiting is not queued a second time. Clones share the
/// same queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                capacity,
                jobs: Mutex::new(VecDeque::with_capacity(capacity)),
                notify: Notify::new(),
            }),
        }
    }

    /// Queue `id` for processing.
    ///
    /// Returns `false` when the queue is full. Queueing a job that is
    /// already waiting succeeds without adding it again.
    pub fn push(&self, id: EmailId) -> bool {
        {
            let mut jobs = self.inner.jobs.lock();

            if jobs.contains(&id) {
                return true;
            }

            if jobs.len() >= self.inner.capacity {
                return false;
            }

            jobs.push_back(id);
        }

        self.inner.notify.notify_one();
        true
    }

    /// Take the oldest waiting job, if any
    pub fn pop(&self) -> Option<EmailId> {
        self.inner.jobs.lock().pop_front()
    }

    /// Wait for the next job.
    ///
    /// Cancel safe: a job is only removed once this future completes.
    pub async fn next(&self) -> EmailId {
        loop {
            let notified = self.inner.notify.notified();

            if let Some(id) = self.pop() {
                return id;
            }

            notified.await;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.jobs.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.jobs.lock().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Waiting jobs, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<EmailId> {
        self.inner.jobs.lock().iter().copied().collect()
    }
}
