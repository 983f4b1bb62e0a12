//! Long-lived execution unit that saves records to the sink.
//!
//! A worker runs as a tokio task for the lifetime of the dispatcher. Its
//! mode is fixed at construction from the sink's buffering hint:
//!
//! - **Unbuffered**: every received job is converted and saved on its own.
//!   A failed save re-enqueues the job with an incremented attempt counter
//!   until the retry cap is exceeded, after which the job is dropped.
//! - **Buffered**: received records accumulate in a private ordered buffer.
//!   When the buffer reaches its effective size the worker flushes it as
//!   one batch. The effective size is `ceil(base * penalty)` where the
//!   penalty starts at 1.0, grows by 1.5× on every failed flush and shrinks
//!   by 2/3 (floored at 1.0) on every successful one. A failed flush keeps
//!   the buffer, so the next flush attempts a larger batch; this throttles
//!   request rate against a struggling sink and amortizes the per-call cost
//!   of the eventual successful retry.
//!
//! On shutdown a worker drains any job already delivered to its slot and,
//! in buffered mode, attempts one final flush of whatever it holds.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::event::Event;
use crate::sink::Sink;

use super::Job;

/// A single member of the worker pool.
///
/// The worker owns its capacity-1 inbound slot; whenever it is ready for
/// work it publishes the slot's sender into the idle pool and waits for the
/// dispatcher to deliver the next job.
pub struct Worker {
    id: usize,
    sink: Arc<dyn Sink>,

    /// Retry re-enqueue path back into the shared job queue.
    job_queue: mpsc::Sender<Job>,

    /// Idle pool shared with the dispatcher.
    pool: mpsc::Sender<mpsc::Sender<Job>>,

    /// Personal inbound slot (capacity 1).
    slot_tx: mpsc::Sender<Job>,
    slot_rx: mpsc::Receiver<Job>,

    /// Per-job save attempt cap (unbuffered mode).
    retry_attempt: u32,

    /// Records awaiting flush (buffered mode), in insertion order.
    buffered_events: Vec<Event>,

    /// Multiplier applied to the base buffer size; never below 1.0.
    penalty: f64,

    /// Buffer size before the penalty is applied.
    base_buffer_size: u32,
}

impl Worker {
    /// Creates a worker with its own inbound slot.
    pub fn new(
        id: usize,
        base_buffer_size: u32,
        retry_attempt: u32,
        sink: Arc<dyn Sink>,
        job_queue: mpsc::Sender<Job>,
        pool: mpsc::Sender<mpsc::Sender<Job>>,
    ) -> Self {
        let (slot_tx, slot_rx) = mpsc::channel(1);
        Worker {
            id,
            sink,
            job_queue,
            pool,
            slot_tx,
            slot_rx,
            retry_attempt,
            buffered_events: Vec::new(),
            penalty: 1.0,
            base_buffer_size,
        }
    }

    /// Returns the worker's identifier.
    pub fn id(&self) -> usize {
        self.id
    }

    /// The buffer fill level that triggers a flush: `ceil(base * penalty)`.
    pub fn effective_buffer_size(&self) -> usize {
        (f64::from(self.base_buffer_size) * self.penalty).ceil() as usize
    }

    /// Spawns the worker's event loop as a tokio task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// The worker event loop: publish the slot, wait for a job, process it.
    async fn run(mut self, cancel: CancellationToken) {
        debug!(worker_id = self.id, "Worker starting");

        loop {
            // Publishing never blocks: the pool's capacity equals the worker
            // count and each worker has at most one outstanding publication.
            if self.pool.send(self.slot_tx.clone()).await.is_err() {
                break;
            }

            tokio::select! {
                job = self.slot_rx.recv() => {
                    let Some(job) = job else { break };
                    self.process(job).await;
                }
                () = cancel.cancelled() => {
                    // The dispatcher may have taken our slot already and
                    // delivered a final job; drain it before exiting.
                    while let Ok(job) = self.slot_rx.try_recv() {
                        self.process(job).await;
                    }
                    break;
                }
            }
        }

        self.flush_remaining().await;
        info!(worker_id = self.id, "Worker stopped");
    }

    /// Routes a job to the mode the sink selected at construction.
    async fn process(&mut self, job: Job) {
        if self.sink.is_buffered() {
            self.buffer(job.event).await;
        } else {
            self.save_single(job).await;
        }
    }

    /// Unbuffered path: one save per job, re-enqueue on failure.
    async fn save_single(&mut self, mut job: Job) {
        let payload = match self.sink.convert(&job.event) {
            Ok(payload) => payload,
            Err(error) => {
                error!(worker_id = self.id, error = %error, "Cannot serialize record, dropping job");
                return;
            }
        };

        match self.sink.save(payload).await {
            Ok(()) => {
                trace!(worker_id = self.id, attempt = job.attempt, "Record saved");
            }
            Err(error) => {
                job.attempt += 1;
                if job.attempt <= self.retry_attempt {
                    warn!(
                        worker_id = self.id,
                        attempt = job.attempt,
                        error = %error,
                        "Save failed, re-enqueueing job"
                    );
                    if self.job_queue.send(job).await.is_err() {
                        error!(worker_id = self.id, "Job queue closed, dropping retry");
                    }
                } else {
                    error!(
                        worker_id = self.id,
                        attempts = self.retry_attempt,
                        error = %error,
                        "Retry attempts exhausted, dropping job"
                    );
                }
            }
        }
    }

    /// Buffered path: append, flush when the effective size is reached.
    async fn buffer(&mut self, event: Event) {
        self.buffered_events.push(event);
        if self.buffered_events.len() >= self.effective_buffer_size() {
            self.flush().await;
        }
    }

    /// Attempts to save the whole buffer as one batch.
    ///
    /// Success clears the buffer and relaxes the penalty toward 1.0; failure
    /// keeps every record in place and raises the penalty, so the next flush
    /// fires later and carries a larger batch.
    async fn flush(&mut self) {
        let payload = match self.sink.convert_batch(&self.buffered_events) {
            Ok(payload) => payload,
            Err(error) => {
                error!(worker_id = self.id, error = %error, "Cannot serialize batch, dropping buffer");
                self.buffered_events.clear();
                return;
            }
        };

        match self.sink.save(payload).await {
            Ok(()) => {
                debug!(
                    worker_id = self.id,
                    records = self.buffered_events.len(),
                    "Batch flushed"
                );
                self.buffered_events.clear();
                self.penalty = (self.penalty * 2.0 / 3.0).max(1.0);
            }
            Err(error) => {
                self.penalty *= 1.5;
                warn!(
                    worker_id = self.id,
                    records = self.buffered_events.len(),
                    penalty = self.penalty,
                    next_flush_at = self.effective_buffer_size(),
                    error = %error,
                    "Flush failed, batch retained"
                );
            }
        }
    }

    /// Final flush of a partial buffer during shutdown.
    ///
    /// The process is exiting, so a failure here is terminal for the records:
    /// log and drop.
    async fn flush_remaining(&mut self) {
        if self.buffered_events.is_empty() {
            return;
        }

        let records = self.buffered_events.len();
        match self.sink.convert_batch(&self.buffered_events) {
            Ok(payload) => match self.sink.save(payload).await {
                Ok(()) => {
                    info!(worker_id = self.id, records, "Final batch flushed during shutdown");
                    self.buffered_events.clear();
                }
                Err(error) => {
                    error!(
                        worker_id = self.id,
                        records,
                        error = %error,
                        "Final flush failed, dropping buffered records"
                    );
                }
            },
            Err(error) => {
                error!(worker_id = self.id, records, error = %error, "Cannot serialize final batch");
            }
        }
    }
}
