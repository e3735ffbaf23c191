//! Asynchronous event dispatch
//!
//! Async events are queued on a channel and each one runs on its own blocking
//! task. There is no ordering between an async invocation and synchronous
//! posts made after it to the same object; callers that need ordering must
//! serialize themselves.

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Deferred invocation
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Channel-fed dispatcher running on a tokio runtime
#[derive(Debug)]
pub struct AsyncDispatcher {
    tx: mpsc::UnboundedSender<Job>,
    task: JoinHandle<()>,
}

impl AsyncDispatcher {
    /// Start the dispatch loop on `handle`
    pub fn start(handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let task = handle.spawn(async move {
            let mut workers = Vec::new();
            while let Some(job) = rx.recv().await {
                workers.retain(|w: &JoinHandle<()>| !w.is_finished());
                workers.push(tokio::task::spawn_blocking(job));
            }
            for worker in workers {
                if let Err(e) = worker.await {
                    warn!("async event worker failed: {}", e);
                }
            }
            debug!("async dispatcher stopped");
        });
        Self { tx, task }
    }

    /// Queue a job; hands it back if the dispatcher has stopped
    pub fn submit(&self, job: Job) -> Result<(), Job> {
        self.tx.send(job).map_err(|e| e.0)
    }

    /// Close the channel and wait for queued and running jobs to finish
    pub async fn stop(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            warn!("async dispatcher task failed: {}", e);
        }
    }
}
