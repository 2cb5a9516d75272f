//! Prometheus text metrics.
//!
//! Series recorded by the client:
//!
//! | Series | Type | Recorded when |
//! |---|---|---|
//! | `ctp_requests_total` | counter | a request is handed to the transport |
//! | `ctp_auth_retries_total` | counter | a 401 triggers the single retry |
//! | `ctp_transport_failures_total` | counter | a dispatch gets no response |
//! | `ctp_token_exchanges_total` | counter | the token endpoint is called |
//! | `ctp_requests_in_flight` | gauge | a dispatch is awaiting its response |
//! | `ctp_token_cache_{hits,misses,invalidations}_total` | counter | the token cache is consulted or cleared |
//!
//! Nothing is served from here; an embedding application concatenates the
//! rendered text into whatever endpoint it already exposes.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
struct Series {
    name: String,
    help: String,
    kind: &'static str,
}

impl Series {
    fn new(name: impl Into<String>, help: impl Into<String>, kind: &'static str) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind,
        }
    }

    fn render(&self, value: u64) -> String {
        let Self { name, help, kind } = self;
        format!("# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n")
    }
}

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    series: Series,
    value: AtomicU64,
}

impl Counter {
    /// Create a counter at zero.
    #[must_use]
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            series: Series::new(name, help, "counter"),
            value: AtomicU64::new(0),
        }
    }

    /// Add one.
    pub fn inc(&self) {
        self.inc_by(1);
    }

    /// Add `amount`.
    pub fn inc_by(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Render as Prometheus text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        self.series.render(self.get())
    }
}

/// A non-negative gauge.
#[derive(Debug)]
pub struct Gauge {
    series: Series,
    value: AtomicU64,
}

impl Gauge {
    /// Create a gauge at zero.
    #[must_use]
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            series: Series::new(name, help, "gauge"),
            value: AtomicU64::new(0),
        }
    }

    /// Add one.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Subtract one, saturating at zero.
    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Render as Prometheus text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        self.series.render(self.get())
    }
}

/// Lookup counters for the token cache.
#[derive(Debug)]
pub struct CacheMetrics {
    /// Lookups answered from the store
    pub hits: Counter,
    /// Lookups that found nothing usable
    pub misses: Counter,
    /// Entries dropped after a rejected token
    pub invalidations: Counter,
}

impl CacheMetrics {
    /// Create counters named `{prefix}_cache_*_total`.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            hits: Counter::new(
                format!("{prefix}_cache_hits_total"),
                "Token lookups served from the store",
            ),
            misses: Counter::new(
                format!("{prefix}_cache_misses_total"),
                "Token lookups that required an exchange",
            ),
            invalidations: Counter::new(
                format!("{prefix}_cache_invalidations_total"),
                "Tokens dropped after rejection",
            ),
        }
    }

    /// Record a hit.
    pub fn record_hit(&self) {
        self.hits.inc();
    }

    /// Record a miss, including expired and undecodable entries.
    pub fn record_miss(&self) {
        self.misses.inc();
    }

    /// Record an invalidation.
    pub fn record_invalidation(&self) {
        self.invalidations.inc();
    }

    /// Render all three counters.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        [&self.hits, &self.misses, &self.invalidations]
            .into_iter()
            .map(Counter::to_prometheus)
            .collect()
    }
}
