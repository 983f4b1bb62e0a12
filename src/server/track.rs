//! Track endpoint handler.
//!
//! Accepts signed event collections, verifies the request signature and the
//! collection's session hash, and enqueues one job per payload. The
//! response is committed only after every job is in the queue; a full queue
//! suspends the handler, so the open connection is the backpressure signal.
//!
//! Rejections follow the wire contract: authentication problems (missing
//! headers, bad signature) answer 405, malformed bodies and session
//! mismatches answer 400, and a draining server answers 503. Error bodies
//! are empty unless verbose mode is on, in which case a small JSON object
//! names the reason.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, warn};

use super::AppState;
use crate::auth::{collection_session, verify_request_signature};
use crate::collection::{Collection, WireError};
use crate::event::Event;
use crate::worker::Job;

/// Header carrying the client-chosen timestamp.
const HEADER_TIME: &str = "X-Hamustro-Time";
/// Header carrying the request signature.
const HEADER_SIGNATURE: &str = "X-Hamustro-Signature";

/// Reasons a track request is refused.
#[derive(Debug, Error)]
pub enum TrackError {
    /// The server is shutting down and refuses new uploads.
    #[error("server is currently shutting down")]
    Draining,

    /// A required header was absent.
    #[error("{0} header is missing")]
    MissingHeader(&'static str),

    /// The signature header did not match the recomputed signature.
    #[error("{HEADER_SIGNATURE} header is invalid")]
    InvalidSignature,

    /// The body was not a decodable collection.
    #[error("decoding the collection failed: {0}")]
    Decode(#[from] WireError),

    /// The collection's declared session did not match its metadata.
    #[error("collection's session attribute is invalid")]
    SessionMismatch,
}

impl TrackError {
    /// The HTTP status this rejection maps to.
    fn status(&self) -> StatusCode {
        match self {
            TrackError::Draining => StatusCode::SERVICE_UNAVAILABLE,
            TrackError::MissingHeader(_) | TrackError::InvalidSignature => {
                StatusCode::METHOD_NOT_ALLOWED
            }
            TrackError::Decode(_) | TrackError::SessionMismatch => StatusCode::BAD_REQUEST,
        }
    }
}

/// Track handler.
///
/// # Request
///
/// - Method: POST
/// - Required headers:
///   - `X-Hamustro-Time`: client-chosen timestamp (opaque)
///   - `X-Hamustro-Signature`: `base64(sha256(time|md5_hex(body)|secret))`
/// - Body: length-prefixed framed collection
///
/// # Response
///
/// - 200 OK: every payload enqueued; body is always empty
/// - 400 Bad Request: undecodable body or session mismatch
/// - 405 Method Not Allowed: missing header or invalid signature
/// - 503 Service Unavailable: server is draining
pub async fn track_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Do not accept new events while the server is shutting down.
    if state.is_draining() {
        return reject(&state, TrackError::Draining);
    }

    let Some(time) = get_header(&headers, HEADER_TIME) else {
        return reject(&state, TrackError::MissingHeader(HEADER_TIME));
    };
    let Some(signature) = get_header(&headers, HEADER_SIGNATURE) else {
        return reject(&state, TrackError::MissingHeader(HEADER_SIGNATURE));
    };

    // Verify the signature before touching the body contents.
    if !verify_request_signature(&body, &time, &signature, state.shared_secret()) {
        return reject(&state, TrackError::InvalidSignature);
    }

    let collection = match Collection::decode(&body) {
        Ok(collection) => collection,
        Err(error) => return reject(&state, TrackError::Decode(error)),
    };

    // The declared session must match the hash of the metadata it claims
    // to describe.
    let expected = collection_session(
        &collection.header.device_id,
        &collection.header.client_id,
        &collection.header.system_version,
        &collection.header.product_version,
    );
    if expected != collection.header.session {
        return reject(&state, TrackError::SessionMismatch);
    }

    debug!(
        session = %collection.header.session,
        payloads = collection.payloads.len(),
        "Accepted collection"
    );

    // One job per payload. A full queue suspends us here, holding the
    // connection open until capacity frees up.
    for payload in &collection.payloads {
        let job = Job::new(Event::new(&collection.header, payload, state.time_mode()));
        if state.jobs().send(job).await.is_err() {
            // The queue only closes during teardown.
            return reject(&state, TrackError::Draining);
        }
    }

    StatusCode::OK.into_response()
}

/// Extracts a header value as a string, treating non-UTF-8 as absent.
fn get_header(headers: &HeaderMap, name: &'static str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Logs a rejection and renders it per the verbose setting.
fn reject(state: &AppState, error: TrackError) -> Response {
    warn!(status = %error.status(), error = %error, "Rejected track request");

    if state.verbose() {
        let body = serde_json::json!({ "error": error.to_string() }).to_string();
        (
            error.status(),
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    } else {
        error.status().into_response()
    }
}
