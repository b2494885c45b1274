use lazy_static::lazy_static;
use prometheus::{
    core::Collector, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::time::Instant;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Inference metrics
    pub static ref INFERENCES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("inferences_total", "Total number of predictions by path (model or mock)"),
        &["path"]
    ).unwrap();

    pub static ref MOCK_FALLBACKS: IntCounter = IntCounter::new(
        "mock_fallbacks_total",
        "Total number of transitions into mock mode"
    ).unwrap();

    pub static ref INFERENCE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "inference_duration_seconds",
            "Real model inference latency in seconds"
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0])
    ).unwrap();

    // Model lifecycle metrics
    pub static ref MODEL_LOAD_ATTEMPTS: IntCounter = IntCounter::new(
        "model_load_attempts_total",
        "Total number of model load attempts"
    ).unwrap();

    pub static ref MODEL_LOAD_FAILURES: IntCounter = IntCounter::new(
        "model_load_failures_total",
        "Total number of failed model loads"
    ).unwrap();

    pub static ref MODEL_FETCH_BYTES: IntGauge = IntGauge::new(
        "model_fetch_bytes",
        "Size in bytes of the last fetched model artifact"
    ).unwrap();

    pub static ref MODEL_LOAD_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "model_load_duration_seconds",
            "Model fetch, parse and warm-up latency in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0])
    ).unwrap();

    // Tensor hygiene
    pub static ref LIVE_TENSORS: IntGauge = IntGauge::new(
        "live_tensors",
        "Number of tracked tensors currently alive"
    ).unwrap();

    // Persistence
    pub static ref RESULTS_PERSISTED: IntCounter = IntCounter::new(
        "results_persisted_total",
        "Total number of analysis results written to the store"
    ).unwrap();
}

fn register<C: Collector + Clone + 'static>(collector: &C) {
    // AlreadyReg is expected when init runs twice (tests, embedded use)
    if let Err(err) = REGISTRY.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            tracing::warn!(error = %err, "Failed to register metric");
        }
    }
}

/// Initialize metrics registry
pub fn init_metrics() {
    register(&*INFERENCES_TOTAL);
    register(&*MOCK_FALLBACKS);
    register(&*INFERENCE_DURATION);

    register(&*MODEL_LOAD_ATTEMPTS);
    register(&*MODEL_LOAD_FAILURES);
    register(&*MODEL_FETCH_BYTES);
    register(&*MODEL_LOAD_DURATION);

    register(&*LIVE_TENSORS);
    register(&*RESULTS_PERSISTED);

    tracing::info!("Metrics registry initialized with {} collectors", REGISTRY.gather().len());
}

/// Share of predictions answered by the mock path, as a percentage
pub fn mock_rate() -> f64 {
    let model = INFERENCES_TOTAL.with_label_values(&["model"]).get() as f64;
    let mock = INFERENCES_TOTAL.with_label_values(&["mock"]).get() as f64;
    let total = model + mock;

    if total == 0.0 {
        0.0
    } else {
        (mock / total) * 100.0
    }
}

/// Helper struct for timing operations
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration_seconds(&self, histogram: &Histogram) {
        let duration = self.start.elapsed();
        histogram.observe(duration.as_secs_f64());
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Export metrics in Prometheus format
pub fn export_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %err, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
