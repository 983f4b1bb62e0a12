//! Normalized event records and their serialized forms.
//!
//! An [`Event`] is the flattened, per-event structure the pipeline forwards:
//! collection metadata merged with one payload, with the payload's epoch
//! timestamp rendered as an ISO-like string. Events are value types and are
//! never mutated after construction.
//!
//! Two serialized forms exist:
//! - [`convert_json`]: one JSON object with a trailing newline (the
//!   unbuffered save unit).
//! - [`convert_batch_json`]: the single encodings concatenated in insertion
//!   order, one record per line (the buffered flush unit).

use bytes::Bytes;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::collection::{CollectionHeader, Payload};

/// Timezone used when rendering payload timestamps.
///
/// The historical wire contract renders `at` in the process's local
/// timezone; `Utc` is the opt-in sane alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeMode {
    /// Render `at` in the process-local timezone.
    #[default]
    Local,

    /// Render `at` in UTC.
    Utc,
}

/// A single normalized telemetry event.
///
/// Field order matters: it is the JSON serialization order consumed
/// downstream. Optional fields are omitted entirely when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Device installation identifier.
    pub device_id: String,

    /// Client application identifier.
    pub client_id: String,

    /// Session hash binding the device/client/version tuple.
    pub session: String,

    /// Client-side sequence number.
    pub nr: u32,

    /// Operating system version string.
    pub system_version: String,

    /// Product version string.
    pub product_version: String,

    /// Event time, formatted `YYYY-MM-DDTHH:MM:SS`.
    pub at: String,

    /// Event name.
    pub event: String,

    /// Operating system name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Git hash of the product build.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_git_hash: Option<String>,

    /// Acting user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u32>,

    /// Client IP address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Free-form event parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,

    /// Marks events generated by test installs.
    pub is_testing: bool,
}

impl Event {
    /// Builds an event from a collection's metadata and one of its payloads.
    pub fn new(header: &CollectionHeader, payload: &Payload, time_mode: TimeMode) -> Self {
        Event {
            device_id: header.device_id.clone(),
            client_id: header.client_id.clone(),
            session: header.session.clone(),
            nr: payload.nr,
            system_version: header.system_version.clone(),
            product_version: header.product_version.clone(),
            at: convert_iso8601(payload.at, time_mode),
            event: payload.event.clone(),
            system: header.system.clone(),
            product_git_hash: header.product_git_hash.clone(),
            user_id: payload.user_id,
            ip: payload.ip.clone(),
            parameters: payload.parameters.clone(),
            is_testing: payload.is_testing,
        }
    }
}

/// Formats epoch seconds as `YYYY-MM-DDTHH:MM:SS` in the selected timezone.
///
/// Out-of-range timestamps clamp to the epoch rather than failing the
/// record; the field is informational and a bad clock on one client must
/// not reject its events.
pub fn convert_iso8601(at: u64, time_mode: TimeMode) -> String {
    let utc = i64::try_from(at)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(DateTime::UNIX_EPOCH);

    match time_mode {
        TimeMode::Local => utc.with_timezone(&Local).format("%Y-%m-%dT%H:%M:%S").to_string(),
        TimeMode::Utc => utc.with_timezone(&Utc).format("%Y-%m-%dT%H:%M:%S").to_string(),
    }
}

/// Serializes one event as a JSON object followed by a newline.
pub fn convert_json(event: &Event) -> Bytes {
    let mut out = serde_json::to_vec(event).expect("events serialize infallibly");
    out.push(b'\n');
    Bytes::from(out)
}

/// Serializes a batch as newline-delimited JSON, preserving order.
pub fn convert_batch_json(events: &[Event]) -> Bytes {
    let mut out = Vec::new();
    for event in events {
        out.extend_from_slice(&convert_json(event));
    }
    Bytes::from(out)
}
