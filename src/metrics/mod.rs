//! Metrics collection for observability
//!
//! Purely observational: nothing here feeds back into selection decisions.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_with_registry, Counter, CounterVec, Histogram, Opts, Registry,
};
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Request outcomes
    pub requests: CounterVec,
    pub stage_invocations: CounterVec,

    // Reduction impact
    pub tokens_removed: Histogram,
    pub quality_impact: Histogram,

    // Window cache
    pub cache_lookups: CounterVec,
    pub cache_evictions: Counter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = register_counter_vec_with_registry!(
            Opts::new("context_window_requests_total", "Total context window requests"),
            &["outcome"],
            registry
        )?;

        let stage_invocations = register_counter_vec_with_registry!(
            Opts::new(
                "context_window_stage_invocations_total",
                "Reduction stage invocations"
            ),
            &["stage"],
            registry
        )?;

        let tokens_removed = register_histogram_with_registry!(
            "context_window_tokens_removed",
            "Tokens removed per reduced request",
            vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0],
            registry
        )?;

        let quality_impact = register_histogram_with_registry!(
            "context_window_quality_impact",
            "Relative quality drop per reduced request",
            vec![-0.5, -0.25, 0.0, 0.1, 0.25, 0.5, 0.75, 1.0],
            registry
        )?;

        let cache_lookups = register_counter_vec_with_registry!(
            Opts::new("context_window_cache_lookups_total", "Window cache lookups"),
            &["result"],
            registry
        )?;

        let cache_evictions = register_counter_with_registry!(
            Opts::new(
                "context_window_cache_evictions_total",
                "Expired windows removed by sweeps"
            ),
            registry
        )?;

        Ok(Self {
            registry,
            requests,
            stage_invocations,
            tokens_removed,
            quality_impact,
            cache_lookups,
            cache_evictions,
        })
    }

    /// Record a request outcome: `passthrough`, `reduced` or `fallback`
    pub fn record_request(&self, outcome: &str) {
        self.requests.with_label_values(&[outcome]).inc();
    }

    /// Record a completed reduction
    pub fn record_reduction(&self, stages: &[String], tokens_removed: usize, quality_impact: f32) {
        for stage in stages {
            self.stage_invocations.with_label_values(&[stage.as_str()]).inc();
        }
        self.tokens_removed.observe(tokens_removed as f64);
        self.quality_impact.observe(quality_impact as f64);
    }

    /// Record a cache lookup: `hit`, `miss` or `expired`
    pub fn record_cache_lookup(&self, result: &str) {
        self.cache_lookups.with_label_values(&[result]).inc();
    }

    pub fn record_cache_evictions(&self, count: usize) {
        self.cache_evictions.inc_by(count as f64);
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}
