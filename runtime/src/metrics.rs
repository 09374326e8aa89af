//! Prometheus exporter for the engine's metrics.
//!
//! Every component records through the `metrics` facade; this module installs
//! the Prometheus recorder, describes the metrics the engine emits and renders
//! them for scraping.
//!
//! # Example
//!
//! ```rust,no_run
//! use seatbook_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! let body = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

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

/// Prometheus recorder plus the address its scrape endpoint is served on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Exporter for `addr`; nothing is installed until [`Self::start`].
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Scrape address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Install the Prometheus recorder and describe the engine's metrics.
    ///
    /// A recorder that is already installed (several servers in one test
    /// binary) is tolerated; [`Self::render`] then returns `None`.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                register_metrics();
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "metrics available at http://{}/metrics", self.addr);
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Recorder handle, once started.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "seatbook.store.mutations",
        "Mutations applied to the seat store, by kind and result"
    );
    describe_counter!("seatbook.bookings.confirmed", "Bookings committed");
    describe_counter!(
        "seatbook.bookings.conflicts",
        "Booking attempts that lost a seat race"
    );
    describe_counter!("seatbook.bookings.cancelled", "Bookings cancelled");
    describe_counter!("seatbook.staff.edits", "Staff layout and status edits committed");
    describe_counter!(
        "seatbook.integrity.violations",
        "Seats found contradicting their booking links"
    );
    describe_counter!("seatbook.feed.published", "Change events published");
    describe_counter!(
        "seatbook.feed.publish_failures",
        "Change events dropped after exhausting publish retries"
    );
    describe_counter!(
        "seatbook.sync.reconciliations",
        "Snapshot pulls after a lost subscription"
    );
    describe_counter!("seatbook.http.requests", "HTTP requests by method and status class");
    describe_histogram!("seatbook.http.duration_seconds", "HTTP request latency");
    describe_counter!("retry.recovered", "Operations that succeeded after a retry");
    describe_counter!("retry.exhausted", "Operations that failed after every retry");
    describe_counter!("store.effects.executed", "Effects run by reducer stores, by type");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn server_is_inert_until_started() {
        let server = MetricsServer::new("127.0.0.1:9090".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
        assert_eq!(server.addr().port(), 9090);
    }

    #[test]
    fn started_server_renders_recorded_metrics() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        metrics::counter!("seatbook.bookings.confirmed").increment(1);

        // Another test may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("seatbook_bookings_confirmed"));
        }
    }
}
