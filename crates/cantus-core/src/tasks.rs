//! Non-real-time background work.
//!
//! Each simulation owns one [`BackgroundWorker`]: a dedicated thread that
//! drains a [`TaskQueue`]. Panics inside a task are caught at the thread
//! boundary, logged, and counted, so they never reach the audio thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::GraphError;

/// A unit of background work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Unbounded multi-producer, multi-consumer queue with blocking pops.
pub struct TaskQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    /// An empty queue.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Appends an item. Never blocks.
    pub fn push(&self, item: T) {
        // Both ends live in `self`, so the channel cannot be disconnected here.
        let _ = self.tx.send(item);
    }

    /// Blocks until an item is available.
    pub fn pop(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Blocks for at most `timeout`; `None` if nothing arrived.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Takes an item if one is ready.
    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Items waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

enum Message {
    Run(Task),
    Terminate,
}

/// Handle used to submit tasks from anywhere, including scheduled calls.
#[derive(Clone)]
pub struct TaskSender {
    queue: TaskQueue<Message>,
}

impl TaskSender {
    /// Queues `task` on the background thread.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        self.queue.push(Message::Run(Box::new(task)));
    }
}

/// Dedicated thread running queued tasks one at a time.
pub struct BackgroundWorker {
    queue: TaskQueue<Message>,
    handle: Option<JoinHandle<()>>,
    failures: Arc<AtomicU64>,
    completed: Arc<AtomicU64>,
}

impl BackgroundWorker {
    /// Spawns the worker thread.
    pub fn spawn() -> Result<Self, GraphError> {
        let queue = TaskQueue::new();
        let failures = Arc::new(AtomicU64::new(0));
        let completed = Arc::new(AtomicU64::new(0));

        let rx = queue.clone();
        let thread_failures = Arc::clone(&failures);
        let thread_completed = Arc::clone(&completed);
        let handle = thread::Builder::new()
            .name("cantus-background".into())
            .spawn(move || {
                while let Some(Message::Run(task)) = rx.pop() {
                    match panic::catch_unwind(AssertUnwindSafe(task)) {
                        Ok(()) => {
                            thread_completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(payload) => {
                            let msg = payload
                                .downcast_ref::<&str>()
                                .map(|s| (*s).to_owned())
                                .or_else(|| payload.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "non-string panic payload".into());
                            tracing::error!(error = %msg, "background task panicked");
                            thread_failures.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                tracing::debug!("background worker exiting");
            })
            .map_err(GraphError::Spawn)?;

        Ok(Self {
            queue,
            handle: Some(handle),
            failures,
            completed,
        })
    }

    /// Handle for submitting tasks.
    pub fn sender(&self) -> TaskSender {
        TaskSender {
            queue: self.queue.clone(),
        }
    }

    /// Queues `task`.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        self.queue.push(Message::Run(Box::new(task)));
    }

    /// Tasks that panicked.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Tasks that finished normally.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Lets queued tasks finish, then stops and joins the thread.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.queue.push(Message::Terminate);
        if handle.join().is_err() {
            tracing::error!("background worker thread panicked outside a task");
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_fifo_and_timeout() {
        let q = TaskQueue::new();
        q.push(1);
        q.push(2);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert!(q.is_empty());
        assert_eq!(q.pop_timeout(Duration::from_millis(5)), None);
    }

    #[test]
    fn test_queue_crosses_threads() {
        let q = TaskQueue::new();
        let producer = q.clone();
        let t = thread::spawn(move || producer.push(42));
        assert_eq!(q.pop_timeout(Duration::from_secs(5)), Some(42));
        t.join().unwrap();
    }

    #[test]
    fn test_worker_runs_tasks_in_order() {
        let mut worker = BackgroundWorker::spawn().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 0..3 {
            let tx = tx.clone();
            worker.submit(move || tx.send(i).unwrap());
        }
        worker.shutdown();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(worker.completed(), 3);
    }

    #[test]
    fn test_worker_survives_panicking_task() {
        let mut worker = BackgroundWorker::spawn().unwrap();
        let sender = worker.sender();
        sender.submit(|| panic!("lost file handle"));
        let (tx, rx) = crossbeam_channel::bounded(1);
        sender.submit(move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        worker.shutdown();
        assert_eq!(worker.failures(), 1);
        assert_eq!(worker.completed(), 1);
    }
}
