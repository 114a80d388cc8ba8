// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Single-worker background dispatch.
//!
//! The async helper for callable slots submits work to a [`Worker`]: one
//! dedicated thread per instance, draining a FIFO queue. Submission returns
//! a [`TaskHandle`] immediately; the caller may wait on it or poll it.
//! Cancellation is not supported; an in-flight task can only be awaited.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Capability: the owning type carries a background worker.
///
/// Instances that never dispatch asynchronously should create the worker
/// lazily:
///
/// ```rust
/// use std::sync::OnceLock;
/// use trellis_slot::{Spawns, Worker};
///
/// struct Device {
///     worker: OnceLock<Worker>,
/// }
///
/// impl Spawns for Device {
///     fn worker(&self) -> &Worker {
///         self.worker.get_or_init(Worker::new)
///     }
/// }
/// ```
pub trait Spawns {
    /// Returns this instance's background worker.
    fn worker(&self) -> &Worker;
}

/// A single-threaded FIFO background executor.
///
/// Submitted tasks run on one dedicated thread in submission order. The
/// number of tasks submitted but not yet finished is available from
/// [`Worker::pending`]. Dropping the worker stops accepting tasks, drains
/// the queue, and joins the thread.
#[derive(Debug)]
pub struct Worker {
    tx: Option<Sender<Job>>,
    pending: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
}

impl Default for Worker {
    fn default() -> Self {
        Self::new()
    }
}

impl Worker {
    /// Spawns the worker thread.
    ///
    /// # Panics
    ///
    /// Panics if the operating system refuses to spawn a thread.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let thread = std::thread::Builder::new()
            .name(String::from("trellis-worker"))
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    job();
                }
            })
            .expect("failed to spawn the background worker thread");
        Self {
            tx: Some(tx),
            pending: Arc::new(AtomicUsize::new(0)),
            thread: Some(thread),
        }
    }

    /// Returns the number of submitted tasks that have not finished yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Submits a task, returning its handle immediately.
    ///
    /// Tasks execute in submission order on the worker thread.
    pub fn submit<R: Send + 'static>(
        &self,
        task: impl FnOnce() -> R + Send + 'static,
    ) -> TaskHandle<R> {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let pending = Arc::clone(&self.pending);
        pending.fetch_add(1, Ordering::SeqCst);

        let job: Job = Box::new(move || {
            let out = task();
            pending.fetch_sub(1, Ordering::SeqCst);
            let _ = done_tx.send(out);
        });
        self.tx
            .as_ref()
            .expect("worker queue is closed")
            .send(job)
            .expect("worker thread is gone");

        TaskHandle { rx: done_rx }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Closing the queue lets the thread drain what was already
        // submitted and exit.
        drop(self.tx.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// A handle to one submitted task.
///
/// The task's result arrives exactly once; wait for it with
/// [`TaskHandle::wait`] or poll with [`TaskHandle::try_wait`].
#[derive(Debug)]
pub struct TaskHandle<R> {
    rx: Receiver<R>,
}

impl<R> TaskHandle<R> {
    /// Blocks until the task finishes and returns its result.
    ///
    /// # Panics
    ///
    /// Panics if the task itself panicked on the worker thread.
    #[must_use]
    pub fn wait(self) -> R {
        self.rx
            .recv()
            .expect("background task panicked before producing a result")
    }

    /// Returns the result if the task has finished, without blocking.
    #[must_use]
    pub fn try_wait(&self) -> Option<R> {
        self.rx.try_recv().ok()
    }
}
