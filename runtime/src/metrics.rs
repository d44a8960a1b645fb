//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for:
//! - Attendance transitions and capacity crossings
//! - Event mutation publishing
//! - Cross-service message consumption
//!
//! # Example
//!
//! ```rust,no_run
//! use rsvp_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.serve()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    fn builder() -> Result<PrometheusBuilder, MetricsError> {
        PrometheusBuilder::new()
            // Configure histogram buckets for latency measurements
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )
            .map_err(|e| MetricsError::Build(e.to_string()))
    }

    /// Install the recorder without an HTTP listener.
    ///
    /// Metrics can still be read through [`render`](Self::render).
    ///
    /// # Errors
    ///
    /// Returns error if the metrics exporter cannot be installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., by another test), this
    /// logs a warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        match Self::builder()?.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => Self::tolerate_existing(&e.to_string()),
        }
    }

    /// Install the recorder and serve `/metrics` on the configured address.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    pub fn serve(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = Self::builder()?
            .with_http_listener(self.addr)
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                self.handle = Some(handle);
                let addr = self.addr;
                tokio::spawn(async move {
                    // The exporter error type has no formatting impls.
                    if exporter.await.is_err() {
                        tracing::error!(addr = %addr, "Metrics listener stopped");
                    }
                });
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => Self::tolerate_existing(&e.to_string()),
        }
    }

    fn tolerate_existing(err_msg: &str) -> Result<(), MetricsError> {
        if err_msg.contains("already initialized") || err_msg.contains("already set") {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            Ok(())
        } else {
            Err(MetricsError::Install(err_msg.to_string()))
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Attendance
    describe_counter!(
        "rsvp_transitions_total",
        "Attendance transitions by outcome (accepted, noop, or an error kind)"
    );
    describe_counter!(
        "rsvp_capacity_reached_total",
        "Commits that moved an event's count to exactly its capacity"
    );
    describe_histogram!(
        "rsvp_transition_duration_seconds",
        "Time taken to decide and commit a transition"
    );

    // Publishing
    describe_counter!(
        "rsvp_messages_published_total",
        "Event mutation messages accepted by the bus, by operation"
    );
    describe_counter!(
        "rsvp_publish_errors_total",
        "Event mutation messages rejected by the bus"
    );
    describe_histogram!(
        "rsvp_publish_duration_seconds",
        "Time taken for the bus client to accept a message"
    );

    // Consumption
    describe_counter!(
        "rsvp_messages_consumed_total",
        "Messages handled by consumers, by outcome (applied, dropped, requeued)"
    );
    describe_histogram!(
        "rsvp_apply_duration_seconds",
        "Time taken to apply a message to the local store"
    );

    // Storage
    describe_histogram!(
        "rsvp_store_transaction_duration_seconds",
        "Time a committed transition held its event row lock"
    );
}

/// Attendance metrics recorder.
pub struct AttendanceMetrics;

impl AttendanceMetrics {
    /// Record a transition attempt and its outcome.
    pub fn record_transition(outcome: &'static str, duration: Duration) {
        counter!("rsvp_transitions_total", "outcome" => outcome).increment(1);
        histogram!("rsvp_transition_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a commit that filled the event.
    pub fn record_capacity_reached() {
        counter!("rsvp_capacity_reached_total").increment(1);
    }
}

/// Publisher metrics recorder.
pub struct PublisherMetrics;

impl PublisherMetrics {
    /// Record a message accepted by the bus.
    pub fn record_publish(operation: &'static str, duration: Duration) {
        counter!("rsvp_messages_published_total", "operation" => operation).increment(1);
        histogram!("rsvp_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a rejected publish.
    pub fn record_publish_error() {
        counter!("rsvp_publish_errors_total").increment(1);
    }
}

/// Consumer metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a handled message.
    pub fn record_consumed(outcome: &'static str) {
        counter!("rsvp_messages_consumed_total", "outcome" => outcome).increment(1);
    }

    /// Record the time spent applying a message.
    pub fn record_apply(duration: Duration) {
        histogram!("rsvp_apply_duration_seconds").record(duration.as_secs_f64());
    }
}
