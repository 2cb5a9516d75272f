//! Per-client counters.

use ctp_common::{Counter, Gauge};

/// Request and token counters for one client, in Prometheus text format.
#[derive(Debug)]
pub struct ClientMetrics {
    /// Dispatches sent to the transport, retries included
    pub requests: Counter,
    /// Dispatches repeated after a 401
    pub auth_retries: Counter,
    /// Dispatches that produced no response
    pub transport_failures: Counter,
    /// Calls made to the token endpoint
    pub token_exchanges: Counter,
    /// Dispatches awaiting a response
    pub in_flight: Gauge,
}

impl Default for ClientMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientMetrics {
    /// Create zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests: Counter::new("ctp_requests_total", "Total requests dispatched"),
            auth_retries: Counter::new(
                "ctp_auth_retries_total",
                "Requests re-dispatched after a 401",
            ),
            transport_failures: Counter::new(
                "ctp_transport_failures_total",
                "Requests that received no response",
            ),
            token_exchanges: Counter::new(
                "ctp_token_exchanges_total",
                "Client credentials exchanges performed",
            ),
            in_flight: Gauge::new("ctp_requests_in_flight", "Requests awaiting a response"),
        }
    }

    /// Count one dispatch as in flight until the guard is dropped.
    #[must_use]
    pub fn track_in_flight(&self) -> InFlight<'_> {
        self.in_flight.inc();
        InFlight(&self.in_flight)
    }

    /// Format all metrics as Prometheus text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        [
            self.requests.to_prometheus(),
            self.auth_retries.to_prometheus(),
            self.transport_failures.to_prometheus(),
            self.token_exchanges.to_prometheus(),
            self.in_flight.to_prometheus(),
        ]
        .concat()
    }
}

/// Guard returned by [`ClientMetrics::track_in_flight`].
#[derive(Debug)]
pub struct InFlight<'a>(&'a Gauge);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}
