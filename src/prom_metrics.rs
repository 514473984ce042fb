//! # Prometheus Metrics — Exposition for Scraping
//!
//! Exposes panel service metrics in the Prometheus text exposition format.
//!
//! ## Metrics Exposed
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `rapd_http_request_duration_seconds` | Histogram | `method`, `path` | Request latency |
//! | `rapd_poll_batches_total` | Counter | `endpoint` | Poll responses served |
//! | `rapd_poll_entries_total` | Counter | `endpoint` | Records returned by polls |
//! | `rapd_mutations_total` | Counter | `kind`, `outcome` | Settings / reprocess submissions |
//!
//! The `/metrics` endpoint renders the current registry state on each scrape.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::{Registry, Unit};
use tracing::warn;

/// Label set for HTTP latency. `path` is normalized so ids do not explode
/// the label space.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabel {
    pub method: String,
    pub path: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EndpointLabel {
    pub endpoint: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MutationLabel {
    pub kind: String,
    pub outcome: String,
}

pub struct Metrics {
    pub registry: Registry,
    pub http_request_duration: Family<HttpLabel, Histogram>,
    pub poll_batches: Family<EndpointLabel, Counter>,
    pub poll_entries: Family<EndpointLabel, Counter>,
    pub mutations: Family<MutationLabel, Counter>,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_request_duration = Family::<HttpLabel, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 14))
        });
        registry.register_with_unit(
            "rapd_http_request_duration",
            "HTTP request latency by method and normalized path",
            Unit::Seconds,
            http_request_duration.clone(),
        );

        let poll_batches = Family::<EndpointLabel, Counter>::default();
        registry.register(
            "rapd_poll_batches",
            "Poll responses served by endpoint",
            poll_batches.clone(),
        );

        let poll_entries = Family::<EndpointLabel, Counter>::default();
        registry.register(
            "rapd_poll_entries",
            "Records returned by poll endpoints",
            poll_entries.clone(),
        );

        let mutations = Family::<MutationLabel, Counter>::default();
        registry.register(
            "rapd_mutations",
            "Settings and reprocess submissions by outcome",
            mutations.clone(),
        );

        Self {
            registry,
            http_request_duration,
            poll_batches,
            poll_entries,
            mutations,
        }
    }

    /// Count one served poll and the number of records it carried.
    pub fn record_poll(&self, endpoint: &str, entries: usize) {
        let label = EndpointLabel {
            endpoint: endpoint.to_string(),
        };
        self.poll_batches.get_or_create(&label).inc();
        self.poll_entries.get_or_create(&label).inc_by(entries as u64);
    }

    pub fn record_mutation(&self, kind: &str, ok: bool) {
        self.mutations
            .get_or_create(&MutationLabel {
                kind: kind.to_string(),
                outcome: if ok { "ok" } else { "error" }.to_string(),
            })
            .inc();
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        if let Err(e) = encode(&mut buf, &self.registry) {
            warn!(error = %e, "metrics encoding failed");
        }
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
