//! Downstream sink capability and dialect construction.
//!
//! The pipeline consumes destinations through the narrow [`Sink`] trait:
//! a buffering hint, converters from records to wire bytes, and `save`.
//! Everything else (compression, object naming, transport, authentication)
//! is sink-internal, and implementations must be safe to call from every
//! worker concurrently.
//!
//! Dialects are tagged variants selected by configuration; [`build`] maps a
//! resolved [`Dialect`] to its constructor. There is no registry: adding a
//! dialect means adding a variant and a match arm.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::config::Dialect;
use crate::event::{Event, convert_batch_json, convert_json};

pub mod blob;
pub mod queue;

pub use blob::BlobSink;
pub use queue::QueueSink;

/// Errors that can occur while constructing a sink or saving to it.
///
/// Save errors are transient from the pipeline's point of view: unbuffered
/// workers re-enqueue the job, buffered workers retain their batch and grow
/// the flush penalty.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Object-store I/O failed.
    #[error("object store error: {0}")]
    Io(#[from] std::io::Error),

    /// Queue transport failed or the endpoint answered non-2xx.
    #[error("queue delivery error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;

/// Capability exposed by a downstream destination.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Whether workers should batch records before saving.
    ///
    /// Buffered sinks receive concatenated batches via [`Sink::convert_batch`];
    /// unbuffered sinks receive one [`Sink::convert`]ed record per save.
    fn is_buffered(&self) -> bool;

    /// Serializes a single record for an unbuffered save.
    fn convert(&self, event: &Event) -> Result<Bytes> {
        Ok(convert_json(event))
    }

    /// Serializes an ordered batch for a buffered flush.
    fn convert_batch(&self, events: &[Event]) -> Result<Bytes> {
        Ok(convert_batch_json(events))
    }

    /// Persists one serialized payload to the destination.
    async fn save(&self, payload: Bytes) -> Result<()>;
}

/// Constructs the sink for a resolved dialect.
pub async fn build(dialect: &Dialect) -> Result<Arc<dyn Sink>> {
    match dialect {
        Dialect::Blob(config) => Ok(Arc::new(BlobSink::new(config).await?)),
        Dialect::Queue(config) => Ok(Arc::new(QueueSink::new(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlobConfig, QueueConfig};
    use crate::event::TimeMode;

    fn test_event() -> Event {
        let header = crate::collection::CollectionHeader {
            device_id: "d".to_string(),
            client_id: "c".to_string(),
            session: "s".to_string(),
            system_version: "10.10".to_string(),
            product_version: "1.1.2".to_string(),
            system: None,
            product_git_hash: None,
        };
        let payload = crate::collection::Payload {
            nr: 1,
            at: 1454684704,
            event: "Client.Ping".to_string(),
            user_id: None,
            ip: None,
            parameters: None,
            is_testing: false,
        };
        Event::new(&header, &payload, TimeMode::Utc)
    }

    #[tokio::test]
    async fn build_selects_blob_dialect() {
        let dir = tempfile::tempdir().unwrap();
        let dialect = Dialect::Blob(BlobConfig {
            path: dir.path().to_path_buf(),
            prefix: String::new(),
        });

        let sink = build(&dialect).await.unwrap();
        assert!(sink.is_buffered());
    }

    #[tokio::test]
    async fn build_selects_queue_dialect() {
        let dialect = Dialect::Queue(QueueConfig {
            url: "http://127.0.0.1:9/queue".to_string(),
        });

        let sink = build(&dialect).await.unwrap();
        assert!(!sink.is_buffered());
    }

    #[tokio::test]
    async fn default_converters_produce_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let sink = BlobSink::new(&BlobConfig {
            path: dir.path().to_path_buf(),
            prefix: String::new(),
        })
        .await
        .unwrap();

        let event = test_event();
        let single = sink.convert(&event).unwrap();
        let batch = sink.convert_batch(&[event.clone(), event]).unwrap();

        assert!(single.ends_with(b"\n"));
        assert_eq!(batch.len(), single.len() * 2);
    }
}
