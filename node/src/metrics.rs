//! # Prometheus Metrics
//!
//! Operational metrics for the validator node, scraped from the
//! `/metrics` endpoint on the dedicated metrics port. All metrics live in
//! a dedicated [`prometheus::Registry`] so they never collide with a
//! default-registry consumer.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Shared handle to the node's metric set.
pub type SharedMetrics = Arc<NodeMetrics>;

/// All Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Confirmed dockets applied by this node.
    pub dockets_confirmed_total: IntCounter,
    /// Consensus rounds this node initiated as leader.
    pub consensus_rounds_total: IntCounter,
    /// Consensus rounds that failed (before any retry succeeded).
    pub consensus_failures_total: IntCounter,
    /// Transactions admitted to the mempool.
    pub transactions_admitted_total: IntCounter,
    /// Transactions rejected at the ingress.
    pub transactions_rejected_total: IntCounter,
    /// Current pending transactions across served registers.
    pub transactions_in_mempool: IntGauge,
    /// Current leader-election term of the first served register.
    pub current_term: IntGauge,
    /// Wall time of one docket build + consensus round, in seconds.
    pub consensus_round_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("meridian".into()), None)
            .expect("failed to create prometheus registry");

        fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
            let metric = IntCounter::new(name, help).expect("metric creation");
            registry
                .register(Box::new(metric.clone()))
                .expect("metric registration");
            metric
        }

        fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
            let metric = IntGauge::new(name, help).expect("metric creation");
            registry
                .register(Box::new(metric.clone()))
                .expect("metric registration");
            metric
        }

        let dockets_confirmed_total = counter(
            &registry,
            "dockets_confirmed_total",
            "Confirmed dockets applied by this node",
        );
        let consensus_rounds_total = counter(
            &registry,
            "consensus_rounds_total",
            "Consensus rounds initiated as leader",
        );
        let consensus_failures_total = counter(
            &registry,
            "consensus_failures_total",
            "Consensus rounds that did not achieve the threshold",
        );
        let transactions_admitted_total = counter(
            &registry,
            "transactions_admitted_total",
            "Transactions admitted to the mempool",
        );
        let transactions_rejected_total = counter(
            &registry,
            "transactions_rejected_total",
            "Transactions rejected at the ingress",
        );
        let transactions_in_mempool = gauge(
            &registry,
            "transactions_in_mempool",
            "Pending transactions across served registers",
        );
        let current_term = gauge(
            &registry,
            "current_term",
            "Leader-election term of the first served register",
        );

        let consensus_round_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "consensus_round_seconds",
                "Docket build plus consensus round duration in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(consensus_round_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            dockets_confirmed_total,
            consensus_rounds_total,
            consensus_failures_total,
            transactions_admitted_total,
            transactions_rejected_total,
            transactions_in_mempool,
            current_term,
            consensus_round_seconds,
        }
    }

    /// Encode all registered metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Axum handler for `GET /metrics`.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {e}"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_encode() {
        let metrics = NodeMetrics::new();
        metrics.dockets_confirmed_total.inc();
        metrics.transactions_in_mempool.set(42);
        metrics.consensus_round_seconds.observe(0.2);

        let text = metrics.encode().unwrap();
        assert!(text.contains("meridian_dockets_confirmed_total 1"));
        assert!(text.contains("meridian_transactions_in_mempool 42"));
        assert!(text.contains("meridian_consensus_round_seconds"));
    }
}
