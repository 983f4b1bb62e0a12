//! Dispatcher owning the worker pool and the job pump.
//!
//! The dispatcher spawns a fixed set of workers plus one pump task. The
//! pump's loop is the whole routing policy:
//!
//! 1. Receive the next job from the bounded job queue (FIFO).
//! 2. Receive an idle worker's inbound slot from the pool (blocks while
//!    every worker is busy).
//! 3. Send the job into that slot.
//!
//! Backpressure composes naturally: a full job queue suspends the intake
//! handlers, an empty idle pool suspends the pump.
//!
//! # Shutdown
//!
//! [`Dispatcher::stop`] cancels the shared token and awaits every task.
//! Workers finish the job in flight (buffered workers flush what they
//! hold) and exit; the job queue itself is not closed: the intake is
//! expected to be gated by the draining flag before stop is called.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sink::Sink;

use super::{Job, Worker};

/// Configuration for the dispatcher and its workers.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of workers to spawn.
    pub max_workers: usize,

    /// Base per-worker buffer size for buffered sinks.
    pub buffer_size: u32,

    /// Staggers per-worker base buffer sizes so workers fed in lockstep do
    /// not all flush on the same record.
    pub spread_buffer: bool,

    /// Per-job save attempt cap for unbuffered sinks.
    pub retry_attempt: u32,
}

impl DispatcherConfig {
    /// Base buffer size for worker `i`.
    ///
    /// With `spread_buffer` the base grows by the worker index, wrapped so
    /// no worker's base exceeds twice the configured size.
    fn buffer_size_for(&self, worker_id: usize) -> u32 {
        if self.spread_buffer {
            self.buffer_size + (worker_id as u32 % self.buffer_size.max(1))
        } else {
            self.buffer_size
        }
    }
}

/// Registry of workers plus the pump routing jobs to idle slots.
pub struct Dispatcher {
    config: DispatcherConfig,
    sink: Arc<dyn Sink>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Creates a dispatcher; call [`Dispatcher::run`] to start it.
    pub fn new(config: DispatcherConfig, sink: Arc<dyn Sink>) -> Self {
        Dispatcher {
            config,
            sink,
            cancel: CancellationToken::new(),
            workers: Vec::new(),
            pump: None,
        }
    }

    /// Spawns the workers and the pump task.
    ///
    /// `job_tx` is the retry path handed to each worker; `job_rx` is the
    /// consuming end of the same queue.
    pub fn run(&mut self, job_tx: mpsc::Sender<Job>, job_rx: mpsc::Receiver<Job>) {
        info!(
            workers = self.config.max_workers,
            buffer_size = self.config.buffer_size,
            spread_buffer = self.config.spread_buffer,
            "Starting dispatcher"
        );

        let (pool_tx, pool_rx) = mpsc::channel(self.config.max_workers);

        for id in 0..self.config.max_workers {
            let worker = Worker::new(
                id,
                self.config.buffer_size_for(id),
                self.config.retry_attempt,
                Arc::clone(&self.sink),
                job_tx.clone(),
                pool_tx.clone(),
            );
            self.workers.push(worker.spawn(self.cancel.child_token()));
        }

        self.pump = Some(tokio::spawn(pump(job_rx, pool_rx, self.cancel.clone())));
    }

    /// Stops the pump and workers, waiting for in-flight work to drain.
    pub async fn stop(mut self) {
        info!("Stopping dispatcher");
        self.cancel.cancel();

        if let Some(pump) = self.pump.take() {
            if pump.await.is_err() {
                warn!("Pump task panicked during shutdown");
            }
        }
        for (id, handle) in self.workers.drain(..).enumerate() {
            if handle.await.is_err() {
                warn!(worker_id = id, "Worker task panicked during shutdown");
            }
        }
        info!("Dispatcher stopped");
    }
}

/// Routes queued jobs to idle workers until cancelled.
async fn pump(
    mut job_rx: mpsc::Receiver<Job>,
    mut pool_rx: mpsc::Receiver<mpsc::Sender<Job>>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            job = job_rx.recv() => {
                let Some(job) = job else { break };
                job
            }
            () = cancel.cancelled() => break,
        };

        let slot = tokio::select! {
            slot = pool_rx.recv() => {
                let Some(slot) = slot else { break };
                slot
            }
            () = cancel.cancelled() => break,
        };

        if slot.send(job).await.is_err() {
            // The worker exited between publishing its slot and delivery;
            // only possible mid-shutdown.
            debug!("Idle slot closed before delivery");
        }
    }

    debug!("Pump stopped");
}
