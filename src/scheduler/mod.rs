//! Per-source, per-priority job queues with bounded concurrency and retry

pub mod job;

pub use job::{Job, JobHandler, JobRecord, QueueKey, QueueStats};

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{QueueConfig, QueuesConfig};
use crate::error::{Result, ScrapeError};
use crate::models::{Priority, Source};

struct Queue {
    key: QueueKey,
    config: QueueConfig,
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    waiting: AtomicUsize,
    delayed: AtomicUsize,
    active: AtomicUsize,
    completed_total: AtomicU64,
    failed_total: AtomicU64,
    completed: Mutex<VecDeque<JobRecord>>,
    failed: Mutex<VecDeque<JobRecord>>,
}

impl Queue {
    fn new(key: QueueKey, config: QueueConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            key,
            config,
            tx,
            rx: Mutex::new(Some(rx)),
            waiting: AtomicUsize::new(0),
            delayed: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            completed_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            completed: Mutex::new(VecDeque::new()),
            failed: Mutex::new(VecDeque::new()),
        }
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            queue: self.key.to_string(),
            waiting: self.waiting.load(Ordering::SeqCst),
            delayed: self.delayed.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
            completed: self.completed_total.load(Ordering::SeqCst),
            failed: self.failed_total.load(Ordering::SeqCst),
        }
    }

    fn is_idle(&self) -> bool {
        self.waiting.load(Ordering::SeqCst) == 0
            && self.delayed.load(Ordering::SeqCst) == 0
            && self.active.load(Ordering::SeqCst) == 0
    }

    fn finish(&self, job: Job, error: Option<String>) {
        let (ring, keep, total) = if error.is_none() {
            (&self.completed, self.config.keep_completed, &self.completed_total)
        } else {
            (&self.failed, self.config.keep_failed, &self.failed_total)
        };
        total.fetch_add(1, Ordering::SeqCst);
        let mut ring = ring.lock();
        ring.push_back(JobRecord {
            job,
            finished_at: Utc::now(),
            error,
        });
        while ring.len() > keep {
            ring.pop_front();
        }
    }
}

/// Four independent queues, one per source and priority.
///
/// Each queue runs at most `concurrency` jobs at once. A failed attempt is
/// re-enqueued after an exponential backoff until the queue's attempt limit
/// is reached; a job that exhausts it is logged and kept in the failed ring.
pub struct QueueScheduler<H: JobHandler> {
    handler: Arc<H>,
    queues: BTreeMap<QueueKey, Arc<Queue>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    tracker: TaskTracker,
    progress: Notify,
}

impl<H: JobHandler> QueueScheduler<H> {
    pub fn new(handler: Arc<H>, config: &QueuesConfig) -> Arc<Self> {
        let queues = QueueKey::all()
            .map(|key| {
                let queue = Queue::new(key, config.for_priority(key.priority).clone());
                (key, Arc::new(queue))
            })
            .collect();
        Arc::new(Self {
            handler,
            queues,
            next_id: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            progress: Notify::new(),
        })
    }

    /// Add a job to the queue for `source` and `is_new`. Jobs enqueued before
    /// `start` wait until it is called.
    pub fn enqueue(&self, source: Source, url: impl Into<String>, is_new: bool) -> Result<u64> {
        if self.cancel.is_cancelled() {
            return Err(ScrapeError::Cancelled);
        }
        let key = QueueKey::new(source, Priority::from_is_new(is_new));
        let queue = &self.queues[&key];
        let job = Job {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            source,
            url: url.into(),
            priority: key.priority,
            attempts_made: 0,
            enqueued_at: Utc::now(),
        };
        let (id, url) = (job.id, job.url.clone());

        queue.waiting.fetch_add(1, Ordering::SeqCst);
        if queue.tx.send(job).is_err() {
            queue.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(ScrapeError::Cancelled);
        }
        debug!(job_id = id, queue = %key, %url, "Enqueued job");
        Ok(id)
    }

    /// Spawn one dispatcher per queue. Calling it again has no effect.
    pub fn start(self: &Arc<Self>) {
        for queue in self.queues.values() {
            let Some(rx) = queue.rx.lock().take() else {
                continue;
            };
            self.tracker
                .spawn(Arc::clone(self).dispatch(Arc::clone(queue), rx));
        }
        info!(queues = self.queues.len(), "Scheduler started");
    }

    /// Dispatch continuously until `shutdown` is called
    pub async fn run(self: &Arc<Self>) {
        self.start();
        self.cancel.cancelled().await;
    }

    pub fn stats(&self) -> Vec<QueueStats> {
        self.queues.values().map(|q| q.stats()).collect()
    }

    pub fn completed_jobs(&self) -> Vec<JobRecord> {
        self.queues
            .values()
            .flat_map(|q| q.completed.lock().iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn failed_jobs(&self) -> Vec<JobRecord> {
        self.queues
            .values()
            .flat_map(|q| q.failed.lock().iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// No job is waiting, delayed for retry, or running
    pub fn is_idle(&self) -> bool {
        self.queues.values().all(|q| q.is_idle())
    }

    /// Resolve once every queue is drained, or on shutdown
    pub async fn wait_idle(&self) {
        loop {
            let progressed = self.progress.notified();
            if self.is_idle() || self.cancel.is_cancelled() {
                return;
            }
            progressed.await;
        }
    }

    /// Cancel running attempts, drop queued and delayed jobs, and let the
    /// handler tear down shared resources.
    pub async fn shutdown(&self) {
        info!("Shutting down scheduler");
        self.cancel.cancel();
        self.handler.shutdown().await;
        self.tracker.close();
        self.tracker.wait().await;
        self.progress.notify_waiters();
        info!("Scheduler stopped");
    }

    async fn dispatch(self: Arc<Self>, queue: Arc<Queue>, mut rx: mpsc::UnboundedReceiver<Job>) {
        let permits = Arc::new(Semaphore::new(queue.config.concurrency));
        let mut dropped = 0usize;

        loop {
            let job = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                permit = Arc::clone(&permits).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                queue.waiting.fetch_sub(1, Ordering::SeqCst);
                dropped += 1;
                break;
            };

            queue.active.fetch_add(1, Ordering::SeqCst);
            queue.waiting.fetch_sub(1, Ordering::SeqCst);
            self.tracker
                .spawn(Arc::clone(&self).execute(Arc::clone(&queue), job, permit));
        }

        rx.close();
        while rx.try_recv().is_ok() {
            queue.waiting.fetch_sub(1, Ordering::SeqCst);
            dropped += 1;
        }
        if dropped > 0 {
            info!(queue = %queue.key, dropped, "Dropped queued jobs on shutdown");
        }
        self.progress.notify_waiters();
    }

    async fn execute(self: Arc<Self>, queue: Arc<Queue>, mut job: Job, permit: OwnedSemaphorePermit) {
        let budget = queue.config.job_timeout();
        let span = info_span!("job", job_id = job.id, queue = %queue.key, attempt = job.attempts_made + 1);

        let outcome = async {
            debug!(url = %job.url, "Job started");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(ScrapeError::Cancelled),
                result = tokio::time::timeout(budget, self.handler.handle(&job)) => {
                    result.unwrap_or(Err(ScrapeError::JobTimeout(budget)))
                }
            }
        }
        .instrument(span.clone())
        .await;
        drop(permit);
        job.attempts_made += 1;

        span.in_scope(|| match outcome {
            Ok(()) => {
                info!("Job completed");
                queue.finish(job, None);
            }
            Err(ScrapeError::Cancelled) => {
                info!("Job cancelled");
            }
            Err(e) if e.is_retryable() && job.attempts_made < queue.config.attempts && !self.cancel.is_cancelled() => {
                let delay = queue.config.backoff_delay(job.attempts_made - 1);
                warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Job attempt failed, retrying");
                queue.delayed.fetch_add(1, Ordering::SeqCst);
                self.schedule_retry(Arc::clone(&queue), job, delay);
            }
            Err(e) => {
                error!(error = %e, attempts = job.attempts_made, url = %job.url, "Job failed");
                queue.finish(job, Some(e.to_string()));
            }
        });

        queue.active.fetch_sub(1, Ordering::SeqCst);
        self.progress.notify_waiters();
    }

    fn schedule_retry(self: &Arc<Self>, queue: Arc<Queue>, job: Job, delay: Duration) {
        let this = Arc::clone(self);
        self.tracker.spawn(async move {
            tokio::select! {
                _ = this.cancel.cancelled() => {
                    queue.delayed.fetch_sub(1, Ordering::SeqCst);
                }
                _ = tokio::time::sleep(delay) => {
                    queue.waiting.fetch_add(1, Ordering::SeqCst);
                    queue.delayed.fetch_sub(1, Ordering::SeqCst);
                    if queue.tx.send(job).is_err() {
                        queue.waiting.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            }
            this.progress.notify_waiters();
        });
    }
}
