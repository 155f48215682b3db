//! Prometheus metrics for the gateway's request pipeline.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Prefix applied to every registered metric name.
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: "gateway".to_string(),
        }
    }
}

/// Error registering a metric with the Prometheus registry.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// A metric with the same name/labels was already registered.
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),
}

/// Process-wide Prometheus metrics handle. Cheap to clone; every handle shares the
/// same underlying registry and counters.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: Histogram,
    upstream_failures: IntCounterVec,
    rate_limit_rejections: IntCounter,
    budget_rejections: IntCounter,
    active_streams: IntGauge,
    tokens_total: IntCounterVec,
}

impl Metrics {
    /// Build and register every metric against a fresh registry.
    ///
    /// # Errors
    /// Returns an error if a metric fails to register (e.g. a duplicate name).
    pub fn new(config: &MetricsConfig) -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let ns = config.namespace.as_str();

        let requests_total = IntCounterVec::new(
            Opts::new(format!("{ns}_requests_total"), "Total requests handled, by route and outcome")
                .namespace(ns),
            &["path", "outcome"],
        )?;
        let request_duration = Histogram::with_opts(
            HistogramOpts::new(format!("{ns}_request_duration_seconds"), "Request latency in seconds")
                .namespace(ns),
        )?;
        let upstream_failures = IntCounterVec::new(
            Opts::new(format!("{ns}_upstream_failures_total"), "Upstream endpoint failures, by endpoint")
                .namespace(ns),
            &["endpoint"],
        )?;
        let rate_limit_rejections = IntCounter::with_opts(
            Opts::new(format!("{ns}_rate_limit_rejections_total"), "Requests rejected by quota enforcement")
                .namespace(ns),
        )?;
        let budget_rejections = IntCounter::with_opts(
            Opts::new(format!("{ns}_budget_rejections_total"), "Requests rejected by budget enforcement")
                .namespace(ns),
        )?;
        let active_streams = IntGauge::with_opts(
            Opts::new(format!("{ns}_active_streams"), "Currently open SSE streams").namespace(ns),
        )?;
        let tokens_total = IntCounterVec::new(
            Opts::new(format!("{ns}_tokens_total"), "Tokens processed, by kind").namespace(ns),
            &["kind"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(upstream_failures.clone()))?;
        registry.register(Box::new(rate_limit_rejections.clone()))?;
        registry.register(Box::new(budget_rejections.clone()))?;
        registry.register(Box::new(active_streams.clone()))?;
        registry.register(Box::new(tokens_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            upstream_failures,
            rate_limit_rejections,
            budget_rejections,
            active_streams,
            tokens_total,
        })
    }

    /// Record a completed request.
    pub fn record_request(&self, path: &str, outcome: &str, duration_secs: f64) {
        self.requests_total.with_label_values(&[path, outcome]).inc();
        self.request_duration.observe(duration_secs);
    }

    /// Record an upstream endpoint failure.
    pub fn record_upstream_failure(&self, endpoint: &str) {
        self.upstream_failures.with_label_values(&[endpoint]).inc();
    }

    /// Increment the rate-limit rejection counter.
    pub fn record_rate_limit_rejection(&self) {
        self.rate_limit_rejections.inc();
    }

    /// Increment the budget rejection counter.
    pub fn record_budget_rejection(&self) {
        self.budget_rejections.inc();
    }

    /// Record prompt/completion token counts for a completed request.
    pub fn record_tokens(&self, prompt: u64, completion: u64) {
        self.tokens_total.with_label_values(&["prompt"]).inc_by(prompt);
        self.tokens_total.with_label_values(&["completion"]).inc_by(completion);
    }

    /// Track a stream opening; the returned guard decrements the gauge on drop.
    #[must_use]
    pub fn track_stream(&self) -> StreamGuard {
        self.active_streams.inc();
        StreamGuard { gauge: self.active_streams.clone() }
    }

    /// Render the current metric values in the Prometheus text exposition format.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    pub fn render(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(MetricsError::Registration)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Decrements the active-stream gauge when a streaming response finishes or drops.
pub struct StreamGuard {
    gauge: IntGauge,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

/// Per-request metrics recorded at the handler level before being folded into
/// [`Metrics`].
#[derive(Debug, Clone, Default)]
pub struct RequestMetrics {
    /// Route path the request was handled under.
    pub path: String,
    /// Outcome label: "success", "client_error", "server_error".
    pub outcome: String,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: i64,
    /// Prompt tokens consumed, if known.
    pub prompt_tokens: u64,
    /// Completion tokens produced, if known.
    pub completion_tokens: u64,
}
