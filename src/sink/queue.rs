//! Unbuffered queue dialect.
//!
//! Every record becomes one HTTP POST to the configured queue endpoint.
//! A non-2xx response is a save error, which the worker turns into a
//! re-enqueue with an incremented attempt counter.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::{Result, Sink};
use crate::config::QueueConfig;

/// Per-delivery request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Queue sink posting one record per save.
pub struct QueueSink {
    client: reqwest::Client,
    url: String,
}

impl QueueSink {
    /// Creates the sink with a shared HTTP client.
    pub fn new(config: &QueueConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(QueueSink {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl Sink for QueueSink {
    fn is_buffered(&self) -> bool {
        false
    }

    async fn save(&self, payload: Bytes) -> Result<()> {
        let bytes = payload.len();
        self.client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?
            .error_for_status()?;

        debug!(url = %self.url, bytes, "Posted record to queue");
        Ok(())
    }
}
