//! Bounded worker pool for broadcast fan-out
//!
//! Fan-out work runs on a fixed set of dedicated OS threads fed by a
//! bounded channel, so a large session set never stalls the hub loop. The
//! jobs themselves are non-blocking enqueues, which is why running a job
//! inline when the queue is full is safe.

use crossbeam_channel::{bounded, Sender, TrySendError};
use std::thread::JoinHandle;
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct TaskPool {
    tx: Sender<Job>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskPool {
    /// Spawn `workers` threads consuming from a queue of `queue_depth`
    /// pending jobs. Thread spawn failure is a startup-time fatal.
    pub(crate) fn new(workers: usize, queue_depth: usize) -> Self {
        let (tx, rx) = bounded::<Job>(queue_depth);
        let handles = (0..workers)
            .map(|i| {
                let rx = rx.clone();
                std::thread::Builder::new()
                    .name(format!("swarmsockets-fanout-{i}"))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                        debug!("fan-out worker exiting");
                    })
                    .expect("failed to spawn fan-out worker thread")
            })
            .collect();
        Self { tx, handles }
    }

    /// Hand a job to the pool. When the queue is full the job runs inline
    /// on the caller; jobs must be non-blocking.
    pub(crate) fn execute(&self, job: Job) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => job(),
        }
    }

    /// Close the queue and wait for the workers to drain it
    pub(crate) fn shutdown(self) {
        drop(self.tx);
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}
