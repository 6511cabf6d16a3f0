//! Single-worker write queue.
//!
//! All mutations of a store's writer state run on one dedicated thread, in
//! submission order. Callers submit closures over the state and may wait for
//! a result. The queue itself is a `tokio` unbounded channel consumed with
//! `blocking_recv`, so neither side needs a runtime.
//!
//! The blocking methods ([`WriteExecutor::call`], [`WriteExecutor::drain`])
//! must not be called from a thread that is driving an async runtime; wrap
//! them in `spawn_blocking` there.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::StorageError;

type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// A FIFO queue of tasks run against state `S` on one worker thread.
pub struct WriteExecutor<S> {
    sender: Option<mpsc::UnboundedSender<Task<S>>>,
    handle: Option<JoinHandle<S>>,
    queued: Arc<AtomicUsize>,
    warn_threshold: usize,
    name: String,
}

impl<S: Send + 'static> WriteExecutor<S> {
    /// Start the worker thread, moving `state` onto it.
    ///
    /// A warning is logged whenever more than `warn_threshold` tasks are
    /// waiting.
    pub fn spawn(name: &str, state: S, warn_threshold: usize) -> Result<Self, StorageError> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task<S>>();
        let queued = Arc::new(AtomicUsize::new(0));
        let worker_queued = Arc::clone(&queued);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = state;
                while let Some(task) = receiver.blocking_recv() {
                    task(&mut state);
                    worker_queued.fetch_sub(1, Ordering::SeqCst);
                }
                state
            })?;

        debug!(worker = %name, "Started write worker");

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            queued,
            warn_threshold: warn_threshold.max(1),
            name: name.to_string(),
        })
    }

    /// Enqueue a task without waiting for it.
    pub fn submit<F>(&self, task: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(StorageError::WriterShutdown)?;

        let waiting = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        if waiting > self.warn_threshold && waiting % self.warn_threshold == 1 {
            warn!(worker = %self.name, waiting, "Write queue is falling behind");
        }

        sender.send(Box::new(task)).map_err(|_| {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            StorageError::WriterShutdown
        })
    }

    /// Enqueue a task and block until it has run, returning its result.
    ///
    /// Every task submitted earlier has run by the time this returns.
    pub fn call<R, F>(&self, task: F) -> Result<R, StorageError>
    where
        F: FnOnce(&mut S) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(move |state| {
            let _ = tx.send(task(state));
        })?;
        rx.blocking_recv().map_err(|_| StorageError::WorkerPanicked)
    }

    /// Block until every task submitted so far has run.
    pub fn drain(&self) -> Result<(), StorageError> {
        self.call(|_| ())
    }

    /// Number of tasks submitted but not yet completed.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Stop accepting tasks, let the queue run dry, and join the worker.
    ///
    /// Returns the final state, or `None` if already shut down.
    pub fn shutdown(&mut self) -> Result<Option<S>, StorageError> {
        self.sender.take();
        match self.handle.take() {
            Some(handle) => {
                let state = handle.join().map_err(|_| StorageError::WorkerPanicked)?;
                debug!(worker = %self.name, "Write worker stopped");
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }
}

impl<S> Drop for WriteExecutor<S> {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
