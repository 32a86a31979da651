//! Prometheus metrics for connection and consumer lifecycles.
//!
//! Counters and gauges are recorded through the `metrics` facade; they are
//! no-ops until a recorder is installed. [`MetricsServer`] installs the
//! Prometheus recorder and renders the scrape payload.
//!
//! # Example
//!
//! ```rust,no_run
//! use resilient_rabbit_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new();
//! server.start()?;
//!
//! // Serve this from your HTTP endpoint
//! let body = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{Unit, describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Connections established (first time and after a loss)
pub const CONNECTIONS_ESTABLISHED: &str = "rabbit_connection_established_total";
/// Hard disconnects detected
pub const CONNECTIONS_LOST: &str = "rabbit_connection_lost_total";
/// Reconnect attempts made by the background loop
pub const RECONNECT_ATTEMPTS: &str = "rabbit_reconnect_attempts_total";
/// Successful consumer registrations
pub const CONSUMER_ACTIVATIONS: &str = "rabbit_consumer_activations_total";
/// Failed consumer registrations
pub const CONSUMER_ACTIVATION_FAILURES: &str = "rabbit_consumer_activation_failures_total";
/// Consumers currently registered with the broker
pub const CONSUMERS_ACTIVE: &str = "rabbit_consumers_active";
/// Deliveries positively acknowledged
pub const MESSAGES_ACKED: &str = "rabbit_messages_acked_total";
/// Deliveries rejected after a callback failure
pub const MESSAGES_NACKED: &str = "rabbit_messages_nacked_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install the Prometheus recorder
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Describe all metrics recorded by this crate.
pub fn register_metrics() {
    describe_counter!(
        CONNECTIONS_ESTABLISHED,
        Unit::Count,
        "Broker connections established"
    );
    describe_counter!(CONNECTIONS_LOST, Unit::Count, "Hard disconnects detected");
    describe_counter!(
        RECONNECT_ATTEMPTS,
        Unit::Count,
        "Connection attempts made while reconnecting"
    );
    describe_counter!(
        CONSUMER_ACTIVATIONS,
        Unit::Count,
        "Consumers registered with the broker"
    );
    describe_counter!(
        CONSUMER_ACTIVATION_FAILURES,
        Unit::Count,
        "Consumer registrations that failed"
    );
    describe_gauge!(
        CONSUMERS_ACTIVE,
        Unit::Count,
        "Consumers currently registered with the broker"
    );
    describe_counter!(MESSAGES_ACKED, Unit::Count, "Deliveries acknowledged");
    describe_counter!(
        MESSAGES_NACKED,
        Unit::Count,
        "Deliveries rejected without requeue"
    );
}

/// Installs the Prometheus recorder and renders the scrape payload.
#[derive(Default)]
pub struct MetricsServer {
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server with no recorder installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe the metrics and install the Prometheus recorder.
    ///
    /// A recorder that is already installed (e.g. by another test) is tolerated.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if the recorder cannot be installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                register_metrics();
                self.handle = Some(handle);
                tracing::info!("Prometheus metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Render the current metrics in Prometheus text format.
    ///
    /// Empty if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.as_ref().map(PrometheusHandle::render).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_recorder_is_empty() {
        assert!(MetricsServer::new().render().is_empty());
    }

    #[test]
    fn describing_without_recorder_is_a_noop() {
        register_metrics();
    }
}
