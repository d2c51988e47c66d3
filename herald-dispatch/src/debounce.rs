//! Per-key debounced tasks

use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::task::AbortHandle;

#[derive(Debug)]
struct Scheduled {
    generation: u64,
    handle: AbortHandle,
}

/// Runs the last task scheduled for a key once `delay` passes without a
/// newer schedule for the same key.
///
/// A task that has started running is never aborted by a later schedule.
#[derive(Debug, Clone)]
pub struct Debouncer<K> {
    delay: Duration,
    generation: Arc<AtomicU64>,
    scheduled: Arc<Mutex<HashMap<K, Scheduled>>>,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
            scheduled: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule `task` for `key`, superseding anything still waiting for it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule<F, Fut>(&self, key: K, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let scheduled = Arc::clone(&self.scheduled);
        let delay = self.delay;
        let owned = key.clone();

        let mut pending = self.scheduled.lock();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let current = {
                let mut pending = scheduled.lock();
                let is_current = pending
                    .get(&owned)
                    .is_some_and(|entry| entry.generation == generation);
                if is_current {
                    pending.remove(&owned);
                }
                is_current
            };

            if current {
                task().await;
            }
        })
        .abort_handle();

        if let Some(previous) = pending.insert(key, Scheduled { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Drop whatever is waiting for `key`. Returns whether anything was.
    pub fn cancel(&self, key: &K) -> bool {
        self.scheduled.lock().remove(key).is_some_and(|entry| {
            entry.handle.abort();
            true
        })
    }

    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.scheduled.lock().contains_key(key)
    }

    /// Keys with a task still waiting
    #[must_use]
    pub fn pending(&self) -> usize {
        self.scheduled.lock().len()
    }
}
