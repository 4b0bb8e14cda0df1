//! Per-name Work Queue
//!
//! Jobs pushed under the same key run one after another in push order. Jobs
//! under different keys run concurrently. Each busy key owns one worker task
//! that retires as soon as its queue is empty.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Serializes work per key
#[derive(Clone, Default)]
pub struct WorkQueue {
    workers: Arc<DashMap<String, mpsc::UnboundedSender<Job>>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a job behind every job already queued under `key`.
    ///
    /// The returned receiver resolves once the job has run. It can be dropped
    /// if nobody needs to wait.
    pub fn push<F>(&self, key: &str, job: F) -> oneshot::Receiver<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            job.await;
            let _ = done_tx.send(());
        });

        match self.workers.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if let Err(mpsc::error::SendError(job)) = entry.get().send(job) {
                    // The worker died with a job in hand
                    warn!("Worker for {} is gone, starting a new one", key);
                    entry.insert(self.spawn_worker(key, job));
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(self.spawn_worker(key, job));
            }
        }

        done_rx
    }

    /// Number of keys with queued or running work
    pub fn busy(&self) -> usize {
        self.workers.len()
    }

    /// Wait until no work is queued or running
    pub async fn wait_idle(&self) {
        while !self.workers.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn spawn_worker(&self, key: &str, first: Job) -> mpsc::UnboundedSender<Job> {
        let (tx, rx) = mpsc::unbounded_channel();
        let workers = Arc::clone(&self.workers);
        let key = key.to_string();

        tokio::spawn(async move {
            Self::work(workers, key, rx, first).await;
        });
        tx
    }

    async fn work(
        workers: Arc<DashMap<String, mpsc::UnboundedSender<Job>>>,
        key: String,
        mut rx: mpsc::UnboundedReceiver<Job>,
        first: Job,
    ) {
        trace!("Worker for {} started", key);
        let mut next = Some(first);

        while let Some(job) = next.take() {
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                warn!("A job for {} panicked", key);
            }

            next = match rx.try_recv() {
                Ok(job) => Some(job),
                Err(_) => {
                    // Retire under the map lock so that a concurrent push
                    // either lands in our queue or starts a new worker.
                    let mut pending = None;
                    workers.remove_if(key.as_str(), |_, _| match rx.try_recv() {
                        Ok(job) => {
                            pending = Some(job);
                            false
                        }
                        Err(_) => true,
                    });
                    pending
                }
            };
        }
        trace!("Worker for {} retired", key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_jobs_for_one_key_run_in_order() {
        let queue = WorkQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut done = Vec::new();
        for i in 0..20u64 {
            let log = log.clone();
            done.push(queue.push("pool", async move {
                // Earlier jobs sleep longer; order must still hold
                tokio::time::sleep(Duration::from_millis(20 - i)).await;
                log.lock().push(i);
            }));
        }
        for rx in done {
            rx.await.unwrap();
        }

        assert_eq!(*log.lock(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_keys_run_independently() {
        let queue = WorkQueue::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let blocked = queue.push("slow", async move {
            let _ = release_rx.await;
        });
        let other = queue.push("fast", async {});

        tokio::time::timeout(Duration::from_secs(5), other)
            .await
            .unwrap()
            .unwrap();
        assert!(queue.busy() >= 1);

        release_tx.send(()).unwrap();
        blocked.await.unwrap();
    }

    #[tokio::test]
    async fn test_workers_retire_when_idle() {
        let queue = WorkQueue::new();
        queue.push("a", async {}).await.unwrap();
        queue.push("b", async {}).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .unwrap();
        assert_eq!(queue.busy(), 0);

        // A retired key accepts work again
        queue.push("a", async {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_drop_queued_jobs() {
        let queue = WorkQueue::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let ran = Arc::new(Mutex::new(Vec::new()));

        let first = queue.push("pool", async move {
            let _ = release_rx.await;
            panic!("job failed");
        });
        let queued: Vec<_> = (0..3)
            .map(|i| {
                let ran = ran.clone();
                queue.push("pool", async move { ran.lock().push(i) })
            })
            .collect();

        release_tx.send(()).unwrap();
        assert!(first.await.is_err());
        for rx in queued {
            tokio::time::timeout(Duration::from_secs(5), rx)
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(*ran.lock(), vec![0, 1, 2]);

        // The worker retires normally afterwards
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .unwrap();
        assert_eq!(queue.busy(), 0);

        queue.push("pool", async {}).await.unwrap();
    }
}
