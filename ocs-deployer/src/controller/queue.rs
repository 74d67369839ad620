//! Work queue of ManagedOCS keys.
//!
//! - A key is queued at most once (`dirty` set)
//! - A key is handed to at most one worker at a time (`processing` map)
//! - A key added while it is processing is queued again on `done`, and the
//!   running pass is told through its [`PassToken`] that it is stale

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ocs_store::ObjectKey;
use tokio::sync::{Mutex, Notify};
use tracing::trace;

use super::backoff::Backoff;

/// Cancellation flag of one reconcile pass.
#[derive(Debug, Clone, Default)]
pub struct PassToken(Arc<AtomicBool>);

impl PassToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the pass as stale. A newer pass for the same key will follow.
    pub fn supersede(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_superseded(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

struct QueueState {
    queue: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashMap<ObjectKey, PassToken>,
    backoff: Backoff,
    shutting_down: bool,
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new(backoff_base: Duration, backoff_max: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashMap::new(),
                backoff: Backoff::new(backoff_base, backoff_max),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Queue `key` unless it is already waiting.
    pub async fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().await;
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }

        if let Some(token) = state.processing.get(&key) {
            trace!(%key, "Key dirtied while processing");
            token.supersede();
            return;
        }

        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Queue `key` after `delay`.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Queue `key` after its backoff delay and return the delay.
    pub async fn add_rate_limited(self: &Arc<Self>, key: ObjectKey) -> Duration {
        let delay = self.state.lock().await.backoff.next_delay(&key);
        self.add_after(key, delay);
        delay
    }

    /// Reset the backoff of `key`.
    pub async fn forget(&self, key: &ObjectKey) {
        self.state.lock().await.backoff.forget(key);
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<(ObjectKey, PassToken)> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    let token = PassToken::new();
                    state.processing.insert(key.clone(), token.clone());
                    if !state.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some((key, token));
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as processed. Requeues it if it was added meanwhile.
    pub async fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker.
    pub async fn shutdown(&self) {
        self.state.lock().await.shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Number of keys waiting to be processed.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn backoff_failures(&self, key: &ObjectKey) -> u32 {
        self.state.lock().await.backoff.failures(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready};

    fn queue() -> Arc<WorkQueue> {
        Arc::new(WorkQueue::new(
            Duration::from_millis(5),
            Duration::from_secs(1),
        ))
    }

    #[tokio::test]
    async fn test_add_deduplicates() {
        let q = queue();
        let key = ObjectKey::new("ns", "mocs");

        q.add(key.clone()).await;
        q.add(key.clone()).await;
        q.add(ObjectKey::new("ns", "other")).await;
        assert_eq!(q.len().await, 2);

        let (first, _) = q.get().await.unwrap();
        assert_eq!(first, key);
    }

    #[tokio::test]
    async fn test_no_overlap_and_requeue_on_done() {
        let q = queue();
        let key = ObjectKey::new("ns", "mocs");

        q.add(key.clone()).await;
        let (got, token) = q.get().await.unwrap();
        assert!(!token.is_superseded());

        // Dirtied while processing: not handed out again yet
        q.add(key.clone()).await;
        assert!(token.is_superseded());
        assert!(q.is_empty().await);

        q.done(&got).await;
        assert_eq!(q.len().await, 1);
        let (again, token) = q.get().await.unwrap();
        assert_eq!(again, key);
        assert!(!token.is_superseded());

        q.done(&again).await;
        assert!(q.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let q = queue();
        let key = ObjectKey::new("ns", "mocs");

        let mut get = tokio_test::task::spawn(q.get());
        assert_pending!(get.poll());

        q.add(key.clone()).await;
        assert!(get.is_woken());
        let (got, _) = assert_ready!(get.poll()).unwrap();
        assert_eq!(got, key);
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let q = queue();

        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;

        q.shutdown().await;
        assert!(waiter.await.unwrap().is_none());

        q.add(ObjectKey::new("ns", "mocs")).await;
        assert!(q.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_add_backs_off() {
        let q = queue();
        let key = ObjectKey::new("ns", "mocs");

        assert_eq!(q.add_rate_limited(key.clone()).await, Duration::from_millis(5));
        assert_eq!(q.add_rate_limited(key.clone()).await, Duration::from_millis(10));
        assert_eq!(q.backoff_failures(&key).await, 2);
        assert!(q.is_empty().await);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(q.len().await, 1);

        q.forget(&key).await;
        assert_eq!(q.backoff_failures(&key).await, 0);
    }
}
