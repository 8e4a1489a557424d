//! Bounded work queue drained by one dedicated consumer thread.
//!
//! A [`WorkQueue`] decouples ingestion from slow work (disk I/O in this
//! crate). Producers call [`WorkQueue::push`], which only takes a short lock;
//! the consumer thread pops items one at a time and hands them to a
//! [`WorkHandler`].
//!
//! # Overflow policies
//!
//! - [`OverflowPolicy::EvictOldest`] drops items from the front until there
//!   is room, then always inserts.
//! - [`OverflowPolicy::Reject`] refuses the new item and leaves the queue
//!   untouched.
//!
//! A `max_len` of 0 means unbounded under both policies.
//!
//! # Lifecycle
//!
//! `Stopped --start--> Running --stop--> Stopped`. Both transitions are
//! idempotent. Stopping lets the consumer finish the items already queued,
//! then joins it.
//!
//! # Failure isolation
//!
//! Errors returned by the handler are logged. Panics inside the handler are
//! caught and logged too, so a single bad item never kills the thread.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::error::{QueueError, Result};

/// What [`WorkQueue::push`] does when the queue already holds `max_len` items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Drop the oldest items until there is room, then insert.
    EvictOldest,
    /// Refuse the new item.
    Reject,
}

/// Per-item work executed on the consumer thread.
pub trait WorkHandler<T>: Send + 'static {
    /// Handles one dequeued item.
    ///
    /// # Errors
    ///
    /// Any error is logged by the queue and otherwise ignored.
    fn handle(&mut self, item: T) -> Result<()>;
}

impl<T, F> WorkHandler<T> for F
where
    F: FnMut(T) -> Result<()> + Send + 'static,
{
    fn handle(&mut self, item: T) -> Result<()> {
        self(item)
    }
}

type BoxedHandler<T> = Box<dyn WorkHandler<T>>;

/// State shared between producers and the consumer thread.
struct Shared<T> {
    items: Mutex<VecDeque<T>>,
    notify: Condvar,
    stop: AtomicBool,
}

impl<T> Shared<T> {
    fn lock_items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A FIFO queue with a single consumer thread.
///
/// The handler is moved into the consumer thread on [`start`](Self::start)
/// and handed back when the thread is joined, so the queue can be restarted.
pub struct WorkQueue<T: Send + 'static> {
    name: String,
    shared: Arc<Shared<T>>,
    /// Parked here while stopped; the mutex keeps the queue `Sync`.
    handler: Mutex<Option<BoxedHandler<T>>>,
    worker: Option<JoinHandle<BoxedHandler<T>>>,
}

impl<T: Send + 'static> WorkQueue<T> {
    /// Creates a stopped queue that will dispatch items to `handler`.
    pub fn new<H: WorkHandler<T>>(name: impl Into<String>, handler: H) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                items: Mutex::new(VecDeque::new()),
                notify: Condvar::new(),
                stop: AtomicBool::new(false),
            }),
            handler: Mutex::new(Some(Box::new(handler))),
            worker: None,
        }
    }

    /// Queue name, also used for the consumer thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues `item` and wakes the consumer.
    ///
    /// Returns the number of items evicted to make room (always 0 under
    /// [`OverflowPolicy::Reject`]).
    ///
    /// # Errors
    ///
    /// [`QueueError::Rejected`] when the policy is `Reject` and the queue
    /// already holds `max_len` items. The queue is left unchanged.
    pub fn push(
        &self,
        item: T,
        max_len: usize,
        policy: OverflowPolicy,
    ) -> std::result::Result<usize, QueueError> {
        let mut evicted = 0;
        {
            let mut items = self.shared.lock_items();
            if max_len > 0 {
                match policy {
                    OverflowPolicy::EvictOldest => {
                        while items.len() >= max_len {
                            items.pop_front();
                            evicted += 1;
                        }
                    }
                    OverflowPolicy::Reject => {
                        if items.len() >= max_len {
                            return Err(QueueError::Rejected { max_len });
                        }
                    }
                }
            }
            items.push_back(item);
        }
        self.shared.notify.notify_all();

        if evicted > 0 {
            tracing::debug!(queue = %self.name, evicted, "queue full, dropped oldest items");
        }
        Ok(evicted)
    }

    /// Drops every pending item.
    pub fn clear(&self) {
        self.shared.lock_items().clear();
    }

    /// Number of items waiting for the consumer.
    pub fn len(&self) -> usize {
        self.shared.lock_items().len()
    }

    /// Whether no items are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the consumer thread is running.
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Starts the consumer thread.
    ///
    /// Returns `false` without doing anything when the thread is already
    /// running.
    ///
    /// # Errors
    ///
    /// [`QueueError::Spawn`] if the OS refuses to create the thread.
    pub fn start(&mut self) -> std::result::Result<bool, QueueError> {
        if self.worker.is_some() {
            return Ok(false);
        }
        let parked = self
            .handler
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut handler) = parked else {
            // Lost if a previous spawn failed or a consumer died outside the handler.
            return Err(QueueError::Spawn {
                name: self.name.clone(),
                source: std::io::Error::other("work handler was lost"),
            });
        };

        self.shared.stop.store(false, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let name = self.name.clone();

        let spawned = thread::Builder::new()
            .name(format!("bbx-{}", self.name))
            .spawn(move || {
                consume(&shared, handler.as_mut(), &name);
                handler
            });

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                Ok(true)
            }
            Err(source) => Err(QueueError::Spawn {
                name: self.name.clone(),
                source,
            }),
        }
    }

    /// Signals the consumer to finish the queued items and joins it.
    ///
    /// Blocks for as long as the handler needs for the backlog, which is
    /// bounded only by the `max_len` used on [`push`](Self::push). Safe to
    /// call on a stopped queue and safe to call repeatedly.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        {
            // Flip the flag under the lock so the consumer cannot miss it
            // between its emptiness check and its wait.
            let _items = self.shared.lock_items();
            self.shared.stop.store(true, Ordering::Release);
        }
        self.shared.notify.notify_all();

        match worker.join() {
            Ok(handler) => {
                *self.handler.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(handler);
            }
            Err(_) => tracing::error!(queue = %self.name, "consumer thread terminated abnormally"),
        }
    }
}

impl<T: Send + 'static> Drop for WorkQueue<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: Send + 'static> std::fmt::Debug for WorkQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Consumer loop: pop one item at a time, wait when empty, exit once stop is
/// requested and nothing is left.
fn consume<T: 'static>(shared: &Shared<T>, handler: &mut dyn WorkHandler<T>, name: &str) {
    loop {
        let next = {
            let mut items = shared.lock_items();
            loop {
                if let Some(item) = items.pop_front() {
                    break Some(item);
                }
                if shared.stop.load(Ordering::Acquire) {
                    break None;
                }
                // Re-checked on every wakeup, spurious or not.
                items = shared
                    .notify
                    .wait(items)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let Some(item) = next else {
            return;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(item))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(queue = %name, "work item failed: {e}"),
            Err(_) => tracing::error!(queue = %name, "work item handler panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecorderError;
    use std::sync::mpsc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn recording_queue() -> (WorkQueue<u32>, mpsc::Receiver<u32>) {
        let (tx, rx) = mpsc::channel();
        let queue = WorkQueue::new("test", move |item: u32| -> Result<()> {
            let _ = tx.send(item);
            Ok(())
        });
        (queue, rx)
    }

    #[test]
    fn test_reject_policy_leaves_queue_unchanged_when_full() {
        let (queue, _rx) = recording_queue();

        for i in 0..3 {
            queue.push(i, 3, OverflowPolicy::Reject).unwrap();
        }
        assert_eq!(queue.len(), 3);

        let result = queue.push(99, 3, OverflowPolicy::Reject);
        assert!(matches!(result, Err(QueueError::Rejected { max_len: 3 })));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_evict_policy_always_inserts() {
        let (mut queue, rx) = recording_queue();

        for i in 0..3 {
            queue.push(i, 3, OverflowPolicy::EvictOldest).unwrap();
        }
        let evicted = queue.push(3, 3, OverflowPolicy::EvictOldest).unwrap();
        assert_eq!(evicted, 1);
        assert_eq!(queue.len(), 3);

        // The oldest item (0) is gone.
        queue.start().unwrap();
        let drained: Vec<u32> = (0..3).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(drained, vec![1, 2, 3]);
    }

    #[test]
    fn test_zero_max_len_is_unbounded() {
        let (queue, _rx) = recording_queue();
        for i in 0..100 {
            queue.push(i, 0, OverflowPolicy::Reject).unwrap();
        }
        assert_eq!(queue.len(), 100);
    }

    #[test]
    fn test_items_are_handled_in_fifo_order() {
        let (mut queue, rx) = recording_queue();
        assert!(queue.start().unwrap());

        for i in 0..50 {
            queue.push(i, 0, OverflowPolicy::Reject).unwrap();
        }

        let received: Vec<u32> = (0..50).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
        assert_eq!(received, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_start_is_idempotent() {
        let (mut queue, _rx) = recording_queue();
        assert!(queue.start().unwrap());
        assert!(!queue.start().unwrap());
        assert!(queue.is_running());
        queue.stop();
        assert!(!queue.is_running());
    }

    #[test]
    fn test_stop_twice_does_not_block() {
        let (mut queue, _rx) = recording_queue();
        queue.start().unwrap();
        queue.stop();
        queue.stop();

        // Never started at all.
        let (mut idle, _rx) = recording_queue();
        idle.stop();
        idle.stop();
    }

    #[test]
    fn test_stop_drains_pending_items() {
        let (mut queue, rx) = recording_queue();
        for i in 0..10 {
            queue.push(i, 0, OverflowPolicy::Reject).unwrap();
        }
        queue.start().unwrap();
        queue.stop();

        let received: Vec<u32> = rx.try_iter().collect();
        assert_eq!(received.len(), 10);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_consumer_thread_is_named_after_queue() {
        let (tx, rx) = mpsc::channel();
        let mut queue = WorkQueue::new("rec-disk0", move |_: u32| -> Result<()> {
            let _ = tx.send(std::thread::current().name().map(str::to_string));
            Ok(())
        });
        assert_eq!(queue.name(), "rec-disk0");

        queue.start().unwrap();
        queue.push(1, 0, OverflowPolicy::Reject).unwrap();
        let thread = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(thread, Some(format!("bbx-{}", queue.name())));
    }

    #[test]
    fn test_restart_after_stop_reuses_handler() {
        let (mut queue, rx) = recording_queue();
        queue.start().unwrap();
        queue.push(1, 0, OverflowPolicy::Reject).unwrap();
        queue.stop();

        assert!(queue.start().unwrap());
        queue.push(2, 0, OverflowPolicy::Reject).unwrap();
        queue.stop();

        let received: Vec<u32> = rx.try_iter().collect();
        assert_eq!(received, vec![1, 2]);
    }

    #[test]
    fn test_failing_and_panicking_items_do_not_kill_consumer() {
        let (tx, rx) = mpsc::channel();
        let mut queue = WorkQueue::new("faulty", move |item: u32| -> Result<()> {
            match item {
                1 => Err(RecorderError::EmptyPayload.into()),
                2 => panic!("bad item"),
                _ => {
                    let _ = tx.send(item);
                    Ok(())
                }
            }
        });
        queue.start().unwrap();

        for i in 0..4 {
            queue.push(i, 0, OverflowPolicy::Reject).unwrap();
        }

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 0);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 3);
        assert!(queue.is_running());
    }

    #[test]
    fn test_clear_drops_pending_items() {
        let (queue, _rx) = recording_queue();
        for i in 0..5 {
            queue.push(i, 0, OverflowPolicy::Reject).unwrap();
        }
        queue.clear();
        assert!(queue.is_empty());
    }
}
