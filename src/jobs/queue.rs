//! # Single-Worker Queue
//!
//! Admission control and serialization onto the one GPU. Jobs are admitted
//! FIFO up to a configured capacity; beyond that, `enqueue` rejects with
//! `QueueFull` — the system's backpressure signal. Exactly one consumer
//! drains the queue, enforced by a worker capability token that can be
//! taken only once per process.
//!
//! ## Blocking semantics:
//! `dequeue` suspends the worker task until an id arrives (or the queue is
//! closed for shutdown). Wakeups use `tokio::sync::Notify`, which stores a
//! permit when `notify_one` fires with no waiter registered, so an enqueue
//! that lands between the worker's empty-check and its `.await` is never
//! lost.

use crate::error::{AppError, AppResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;

/// Proof that the holder is the one worker loop for this queue.
///
/// The queue hands out exactly one of these; the worker loop cannot be
/// constructed without it. Running a second loop against the same GPU is a
/// configuration error, and this makes it unrepresentable rather than
/// merely documented.
pub struct WorkerToken {
    _private: (),
}

struct QueueState {
    queue: VecDeque<Uuid>,
    closed: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    token_taken: AtomicBool,
}

/// Bounded FIFO queue of job ids. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    /// Create a queue admitting at most `capacity` queued jobs.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState { queue: VecDeque::new(), closed: false }),
                notify: Notify::new(),
                capacity,
                token_taken: AtomicBool::new(false),
            }),
        }
    }

    /// Take the single worker capability token. Returns `None` on every
    /// call after the first.
    pub fn take_worker_token(&self) -> Option<WorkerToken> {
        if self.inner.token_taken.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(WorkerToken { _private: () })
        }
    }

    /// Admit a job id, or reject it when the queue is at capacity.
    pub fn enqueue(&self, id: Uuid) -> AppResult<()> {
        let mut state = self.inner.state.lock().unwrap();
        if state.closed {
            return Err(AppError::Internal("queue is shut down".to_string()));
        }
        if state.queue.len() >= self.inner.capacity {
            return Err(AppError::QueueFull { capacity: self.inner.capacity });
        }
        state.queue.push_back(id);
        drop(state);
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Wait for the next job id, FIFO. Returns `None` once the queue has
    /// been closed and fully drained. Only the worker loop calls this.
    pub async fn dequeue(&self) -> Option<Uuid> {
        loop {
            {
                let mut state = self.inner.state.lock().unwrap();
                if let Some(id) = state.queue.pop_front() {
                    return Some(id);
                }
                if state.closed {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Remove a still-queued id. Returns `false` if the id is not queued
    /// (already dequeued, or never enqueued).
    pub fn cancel(&self, id: Uuid) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        let before = state.queue.len();
        state.queue.retain(|queued| *queued != id);
        state.queue.len() < before
    }

    /// Stop admission and let the worker drain what is left, then exit.
    pub fn close(&self) {
        let mut state = self.inner.state.lock().unwrap();
        state.closed = true;
        drop(state);
        // Stored permit covers a worker that has not yet parked itself.
        self.inner.notify.notify_one();
    }

    /// Number of jobs currently waiting.
    pub fn depth(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = JobQueue::new(10);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        queue.enqueue(a).unwrap();
        queue.enqueue(b).unwrap();
        queue.enqueue(c).unwrap();

        assert_eq!(queue.dequeue().await, Some(a));
        assert_eq!(queue.dequeue().await, Some(b));
        assert_eq!(queue.dequeue().await, Some(c));
    }

    #[test]
    fn test_capacity_bound_rejects() {
        let queue = JobQueue::new(2);
        queue.enqueue(Uuid::new_v4()).unwrap();
        queue.enqueue(Uuid::new_v4()).unwrap();

        let err = queue.enqueue(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, AppError::QueueFull { capacity: 2 }));
        assert_eq!(queue.depth(), 2);
    }

    #[tokio::test]
    async fn test_dequeue_frees_capacity() {
        let queue = JobQueue::new(1);
        queue.enqueue(Uuid::new_v4()).unwrap();
        assert!(queue.enqueue(Uuid::new_v4()).is_err());

        queue.dequeue().await.unwrap();
        assert!(queue.enqueue(Uuid::new_v4()).is_ok());
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = JobQueue::new(4);
        let id = Uuid::new_v4();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        // Give the waiter time to park before the id arrives
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(id).unwrap();

        assert_eq!(waiter.await.unwrap(), Some(id));
    }

    #[test]
    fn test_cancel_removes_only_queued_ids() {
        let queue = JobQueue::new(4);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        queue.enqueue(a).unwrap();
        queue.enqueue(b).unwrap();

        assert!(queue.cancel(a));
        assert!(!queue.cancel(a));
        assert!(!queue.cancel(Uuid::new_v4()));
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = JobQueue::new(4);
        let a = Uuid::new_v4();
        queue.enqueue(a).unwrap();
        queue.close();

        // Remaining work is still handed out before the end-of-stream
        assert_eq!(queue.dequeue().await, Some(a));
        assert_eq!(queue.dequeue().await, None);

        // No admission after close
        assert!(queue.enqueue(Uuid::new_v4()).is_err());
    }

    #[tokio::test]
    async fn test_close_wakes_parked_worker() {
        let queue = JobQueue::new(4);
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        assert_eq!(waiter.await.unwrap(), None);
    }

    #[test]
    fn test_worker_token_is_handed_out_once() {
        let queue = JobQueue::new(4);
        assert!(queue.take_worker_token().is_some());
        assert!(queue.take_worker_token().is_none());
        assert!(queue.take_worker_token().is_none());
    }
}
