//! # Prometheus Metrics
//!
//! Listener metrics, scraped at `/metrics` on the configured metrics port.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] under the
//! `chainwatch` namespace, so they do not collide with any default global
//! registry consumers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

use chainwatch_core::{Listener, PollOutcome};

use crate::api::AppState;

/// Metric handles for the listener. Cheap to clone; prometheus handles are
/// reference counted.
#[derive(Clone)]
pub struct ListenerMetrics {
    registry: Registry,
    /// Blocks accepted through `BlocksParsed`.
    pub blocks_parsed_total: IntCounter,
    /// Reorganisations detected and resolved.
    pub reorganisations_total: IntCounter,
    /// Height of the newest block in the window.
    pub head_height: IntGauge,
    /// Local blocks discarded per reorganisation.
    pub reorganisation_depth: Histogram,
}

impl ListenerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("chainwatch".into()), None)?;

        let blocks_parsed_total = IntCounter::new(
            "blocks_parsed_total",
            "Total number of blocks accepted into the chain window",
        )?;
        registry.register(Box::new(blocks_parsed_total.clone()))?;

        let reorganisations_total = IntCounter::new(
            "reorganisations_total",
            "Total number of chain reorganisations resolved",
        )?;
        registry.register(Box::new(reorganisations_total.clone()))?;

        let head_height = IntGauge::new("head_height", "Height of the newest block in the window")?;
        registry.register(Box::new(head_height.clone()))?;

        let reorganisation_depth = Histogram::with_opts(
            HistogramOpts::new(
                "reorganisation_depth",
                "Number of local blocks discarded per reorganisation",
            )
            .buckets(vec![1.0, 2.0, 3.0, 5.0, 10.0, 25.0, 100.0, 500.0]),
        )?;
        registry.register(Box::new(reorganisation_depth.clone()))?;

        Ok(Self {
            registry,
            blocks_parsed_total,
            reorganisations_total,
            head_height,
            reorganisation_depth,
        })
    }

    /// Folds one follower poll into the metrics.
    pub fn observe(&self, outcome: &PollOutcome, listener: &Listener) {
        match outcome {
            PollOutcome::Advanced { blocks, .. } => {
                self.blocks_parsed_total.inc_by(*blocks as u64);
            }
            PollOutcome::Reorganised { discarded, .. } => {
                self.reorganisations_total.inc();
                self.reorganisation_depth.observe(*discarded as f64);
            }
            PollOutcome::Idle | PollOutcome::Reset => {}
        }
        if let Some(head) = listener.chain().head_height() {
            self.head_height.set(head as i64);
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
