//! Inbound collection model and wire codec.
//!
//! A collection is one upload from one device: shared metadata (device,
//! client, session, versions) plus an ordered batch of event payloads. On
//! the wire a collection is a sequence of length-prefixed frames:
//!
//! ```text
//! [u32 BE length][header frame][u32 BE length][payload frame]...
//! ```
//!
//! The first frame is the JSON-encoded [`CollectionHeader`]; every following
//! frame is one JSON-encoded [`Payload`]. The frame envelope makes the body
//! self-delimiting so truncated uploads are detected instead of silently
//! dropping trailing events: a length prefix that runs past the end of the
//! body, leftover bytes after the last frame, or an invalid JSON frame all
//! fail the decode.
//!
//! [`encode`] produces the same format and is what Rust clients and the test
//! suite use to build request bodies.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on a single frame, in bytes.
///
/// Bounds handler memory against hostile length prefixes; a frame larger
/// than this fails the decode before any allocation.
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Errors that can occur while decoding a wire collection.
#[derive(Debug, Error)]
pub enum WireError {
    /// The body ended in the middle of a frame or its length prefix.
    #[error("truncated frame: need {needed} more bytes")]
    Truncated {
        /// Bytes missing from the incomplete frame.
        needed: usize,
    },

    /// A frame length prefix exceeded the per-frame cap.
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge {
        /// The declared frame length.
        len: usize,
    },

    /// The body contained no frames at all.
    #[error("empty body: missing collection header frame")]
    Empty,

    /// A frame was not valid JSON for its expected shape.
    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] serde_json::Error),
}

/// Result type for wire codec operations.
pub type Result<T> = std::result::Result<T, WireError>;

/// Per-device metadata shared by every payload in a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionHeader {
    /// Device installation identifier.
    pub device_id: String,

    /// Client application identifier.
    pub client_id: String,

    /// Declared session; must match the recomputed session hash.
    pub session: String,

    /// Operating system version string.
    pub system_version: String,

    /// Product version string.
    pub product_version: String,

    /// Operating system name, if the client reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Git hash of the product build, if the client reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_git_hash: Option<String>,
}

/// One event's dynamic fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Client-side sequence number.
    pub nr: u32,

    /// Event time as epoch seconds.
    pub at: u64,

    /// Event name.
    pub event: String,

    /// Acting user, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u32>,

    /// Client IP address, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Free-form event parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,

    /// Marks events generated by test installs.
    #[serde(default)]
    pub is_testing: bool,
}

/// A decoded inbound collection: header metadata plus ordered payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    /// Shared per-device metadata.
    pub header: CollectionHeader,

    /// Event payloads in client order.
    pub payloads: Vec<Payload>,
}

impl Collection {
    /// Decodes a collection from its framed wire form.
    ///
    /// The first frame must be the collection header; every remaining frame
    /// is one payload. A collection with zero payloads is valid (the upload
    /// is accepted and enqueues nothing).
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut buf = body;

        let header_frame = next_frame(&mut buf)?.ok_or(WireError::Empty)?;
        let header: CollectionHeader = serde_json::from_slice(header_frame)?;

        let mut payloads = Vec::new();
        while let Some(frame) = next_frame(&mut buf)? {
            payloads.push(serde_json::from_slice(frame)?);
        }

        Ok(Collection { header, payloads })
    }
}

/// Encodes a collection into its framed wire form.
///
/// This is the client-side counterpart of [`Collection::decode`]; the
/// server never calls it outside of tests.
pub fn encode(header: &CollectionHeader, payloads: &[Payload]) -> Bytes {
    let mut out = BytesMut::new();
    put_frame(&mut out, header);
    for payload in payloads {
        put_frame(&mut out, payload);
    }
    out.freeze()
}

/// Reads the next length-prefixed frame, advancing the cursor past it.
///
/// Returns `Ok(None)` at a clean end of input.
fn next_frame<'a>(buf: &mut &'a [u8]) -> Result<Option<&'a [u8]>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf.len() < 4 {
        return Err(WireError::Truncated {
            needed: 4 - buf.len(),
        });
    }

    let len = buf.get_u32() as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge { len });
    }
    if buf.len() < len {
        return Err(WireError::Truncated {
            needed: len - buf.len(),
        });
    }

    let (frame, rest) = buf.split_at(len);
    *buf = rest;
    Ok(Some(frame))
}

/// Appends one serialized frame with its length prefix.
fn put_frame<T: Serialize>(out: &mut BytesMut, value: &T) {
    let frame = serde_json::to_vec(value).expect("frame types serialize infallibly");
    out.put_u32(frame.len() as u32);
    out.put_slice(&frame);
}
