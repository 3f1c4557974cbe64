//! # HTTP Interface
//!
//! The node's small read-only HTTP surface, served on the metrics port.
//! All endpoints share [`AppState`] through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path       | Description                          |
//! |--------|------------|--------------------------------------|
//! | GET    | `/health`  | Liveness check                       |
//! | GET    | `/status`  | Listener status, version, window     |
//! | GET    | `/metrics` | Prometheus text exposition           |

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

use chainwatch_core::{Listener, ListenerStatus};

use crate::metrics::{metrics_handler, ListenerMetrics};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for request handlers. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub metrics: Arc<ListenerMetrics>,
    /// Last listener state published by the follower.
    pub view: Arc<RwLock<ListenerView>>,
}

impl AppState {
    pub fn new(metrics: ListenerMetrics, listener: &Listener) -> Self {
        Self {
            metrics: Arc::new(metrics),
            view: Arc::new(RwLock::new(ListenerView::from_listener(listener))),
        }
    }

    pub fn publish(&self, listener: &Listener) {
        *self.view.write() = ListenerView::from_listener(listener);
    }
}

/// Point-in-time summary of a listener. Also what `inspect` prints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerView {
    pub aggregate_id: String,
    pub status: ListenerStatus,
    pub version: u64,
    pub head_height: Option<u64>,
    pub head_hash: Option<String>,
    pub tail_height: Option<u64>,
    pub window_len: usize,
    pub max_size: usize,
}

impl ListenerView {
    pub fn from_listener(listener: &Listener) -> Self {
        let chain = listener.chain();
        Self {
            aggregate_id: listener.id().to_string(),
            status: listener.status(),
            version: listener.version(),
            head_height: chain.head_height(),
            head_hash: chain.head().map(|b| b.hash.clone()),
            tail_height: chain.tail_height(),
            window_len: chain.len(),
            max_size: chain.max_size(),
        }
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let view = state.view.read().clone();
    (StatusCode::OK, Json(view))
}
