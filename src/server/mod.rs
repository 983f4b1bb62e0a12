//! HTTP server for the event-ingestion gateway.
//!
//! This module implements the HTTP surface that:
//! - Accepts signed event collections and enqueues their payloads as jobs
//! - Refuses new uploads with 503 once the server is draining
//! - Provides a health check for liveness probes
//!
//! # Endpoints
//!
//! - `POST /api/v1/track` - Accepts a signed, framed collection (returns 200)
//! - `GET /health` - Returns 200 if the server is running

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use crate::event::TimeMode;
use crate::worker::Job;

pub mod health;
pub mod track;

pub use health::health_handler;
pub use track::track_handler;

/// Shared application state.
///
/// Passed to all handlers via Axum's `State` extractor. Cheap to clone;
/// the draining flag is shared by every clone.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Secret shared with clients for request signing.
    shared_secret: String,

    /// Whether error responses carry a JSON body.
    verbose: bool,

    /// Timezone for record timestamp rendering.
    time_mode: TimeMode,

    /// Producer side of the bounded job queue.
    jobs: mpsc::Sender<Job>,

    /// Set once by the shutdown controller; read by every intake task.
    draining: AtomicBool,
}

impl AppState {
    /// Creates a new `AppState`.
    pub fn new(
        shared_secret: impl Into<String>,
        verbose: bool,
        time_mode: TimeMode,
        jobs: mpsc::Sender<Job>,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                shared_secret: shared_secret.into(),
                verbose,
                time_mode,
                jobs,
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the shared signing secret.
    pub fn shared_secret(&self) -> &str {
        &self.inner.shared_secret
    }

    /// Whether error responses carry a JSON body.
    pub fn verbose(&self) -> bool {
        self.inner.verbose
    }

    /// Timezone for record timestamp rendering.
    pub fn time_mode(&self) -> TimeMode {
        self.inner.time_mode
    }

    /// Returns the job queue's producer side.
    pub fn jobs(&self) -> &mpsc::Sender<Job> {
        &self.inner.jobs
    }

    /// Whether the server is refusing new uploads.
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Flips the draining flag; every subsequent upload is answered 503.
    pub fn start_draining(&self) {
        self.inner.draining.store(true, Ordering::SeqCst);
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/api/v1/track", post(track_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> (AppState, mpsc::Receiver<Job>) {
        let (job_tx, job_rx) = mpsc::channel(16);
        let state = AppState::new("secret", false, TimeMode::Utc, job_tx);
        (state, job_rx)
    }

    #[test]
    fn app_state_accessors_work() {
        let (state, _jobs) = test_state();

        assert_eq!(state.shared_secret(), "secret");
        assert!(!state.verbose());
        assert_eq!(state.time_mode(), TimeMode::Utc);
        assert!(!state.is_draining());
    }

    #[test]
    fn draining_flag_is_shared_across_clones() {
        let (state, _jobs) = test_state();
        let cloned = state.clone();

        state.start_draining();

        assert!(cloned.is_draining());
    }
}
