//! Single-thread background executor.
//!
//! The initial decision-cache build runs off the caller's thread on a
//! dedicated worker so that system-ready is not blocked on an O(N²·users²)
//! computation. Jobs are executed in submission order; [`flush`] gives
//! tests and shutdown paths a way to wait for everything submitted so
//! far.
//!
//! [`flush`]: BackgroundExecutor::flush

use std::sync::mpsc;
use std::thread;

use thiserror::Error;
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors from job submission.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExecutorError {
    /// The executor has shut down and accepts no further jobs.
    #[error("background executor is shut down")]
    ShutDown,
}

/// A dedicated single-thread job queue.
///
/// Dropping the executor closes the queue and joins the worker after it
/// drains the jobs already submitted.
#[derive(Debug)]
pub struct BackgroundExecutor {
    sender: Option<mpsc::Sender<Job>>,
    worker: Option<thread::JoinHandle<()>>,
    inline: bool,
}

impl BackgroundExecutor {
    /// Spawns the worker thread under the given name.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to spawn the thread.
    #[must_use]
    pub fn new(thread_name: &str) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
                debug!("background executor drained; worker exiting");
            })
            .expect("failed to spawn background executor thread");
        Self {
            sender: Some(sender),
            worker: Some(worker),
            inline: false,
        }
    }

    /// Creates an executor that runs every job on the submitting thread.
    ///
    /// Used by tests that need deterministic completion and by embedders
    /// that already own a scheduling story.
    #[must_use]
    pub fn inline() -> Self {
        Self {
            sender: None,
            worker: None,
            inline: true,
        }
    }

    /// Submits a job.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::ShutDown`] if the worker is gone.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> Result<(), ExecutorError> {
        if self.inline {
            job();
            return Ok(());
        }
        let sender = self.sender.as_ref().ok_or(ExecutorError::ShutDown)?;
        sender
            .send(Box::new(job))
            .map_err(|_| ExecutorError::ShutDown)
    }

    /// Blocks until every job submitted before this call has run.
    pub fn flush(&self) {
        if self.inline {
            return;
        }
        let (done_tx, done_rx) = mpsc::channel();
        if self
            .execute(move || {
                let _ = done_tx.send(());
            })
            .is_ok()
        {
            let _ = done_rx.recv();
        }
    }
}

impl Drop for BackgroundExecutor {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
