//! Single background worker
//!
//! Tasks of a session run one after another on one named thread. The
//! caller blocks until the submitted task has finished.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::error::{Result, SyncError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Single-consumer task queue backed by one thread
pub struct TaskWorker {
    name: String,
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl TaskWorker {
    pub fn spawn(name: &str) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(receiver))?;
        tracing::debug!(worker = name, "Worker thread started");
        Ok(Self {
            name: name.to_string(),
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `job` on the worker and wait for its result
    pub fn execute<R, F>(&self, job: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let sender = self.sender.as_ref().ok_or(SyncError::WorkerUnavailable)?;
        let (tx, rx) = mpsc::channel();
        sender
            .send(Box::new(move || {
                let _ = tx.send(job());
            }))
            .map_err(|_| SyncError::WorkerUnavailable)?;
        rx.recv()
            .map_err(|_| SyncError::Internal(format!("task on worker '{}' panicked", self.name)))
    }
}

fn worker_loop(receiver: Receiver<Job>) {
    while let Ok(job) = receiver.recv() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!("Background task panicked");
        }
    }
}

impl Drop for TaskWorker {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jobs_run_in_order_on_one_thread() {
        let worker = TaskWorker::spawn("test-worker").unwrap();
        let first = worker
            .execute(|| thread::current().name().map(str::to_string))
            .unwrap();
        let second = worker.execute(|| 40 + 2).unwrap();

        assert_eq!(first.as_deref(), Some("test-worker"));
        assert_eq!(second, 42);
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let worker = TaskWorker::spawn("panicky").unwrap();
        let err = worker
            .execute(|| -> u32 { panic!("boom") })
            .unwrap_err();
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert_eq!(worker.execute(|| 7).unwrap(), 7);
    }
}
