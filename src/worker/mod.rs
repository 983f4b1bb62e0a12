//! Worker pool for saving records to the downstream sink.
//!
//! The intake handler turns each accepted payload into a [`Job`] and pushes
//! it onto a bounded queue. The [`Dispatcher`] pairs queued jobs with idle
//! workers: every worker owns a capacity-1 inbound slot and publishes the
//! slot's sender into a shared pool whenever it is ready for work.
//!
//! ```text
//! intake ──► job queue ──► dispatcher ──► idle worker slot ──► worker ──► sink
//!                ▲                                               │
//!                └────────────── retry (attempt + 1) ────────────┘
//! ```
//!
//! Jobs are drained from the queue in FIFO order; completion order across
//! workers is unordered. Within one worker, buffered records keep insertion
//! order and flush as a batch in that order.

use crate::event::Event;

mod dispatch;
mod worker;

pub use dispatch::{Dispatcher, DispatcherConfig};
pub use worker::Worker;

/// A queued unit of work: one record plus its save-attempt counter.
///
/// A job lives in exactly one place at a time: the job queue, a worker's
/// inbound slot, or (dissolved into its record) a worker's buffer. The
/// attempt counter starts at 1 and is bumped by the owning worker before a
/// retry re-enqueue.
#[derive(Debug, Clone)]
pub struct Job {
    /// The record to save.
    pub event: Event,

    /// Save attempts made so far, counting the upcoming one.
    pub attempt: u32,
}

impl Job {
    /// Wraps a freshly constructed record as a first-attempt job.
    pub fn new(event: Event) -> Self {
        Job { event, attempt: 1 }
    }
}
