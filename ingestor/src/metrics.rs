use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref REPORTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_reports_total",
        "Total report messages received from MQTT"
    ))
    .unwrap();
    pub static ref REPORTS_DECODED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_reports_decoded_total",
        "Total reports decoded and queued for ingestion"
    ))
    .unwrap();
    pub static ref DECODE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_decode_failures_total",
        "Total reports dropped for malformed payload, missing fields or bad image encoding"
    ))
    .unwrap();
    pub static ref IMAGES_STORED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_images_stored_total",
        "Total reports fully persisted (blob and metadata)"
    ))
    .unwrap();
    pub static ref STORAGE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_storage_failures_total",
        "Total blob or metadata writes that failed or timed out"
    ))
    .unwrap();
    pub static ref PRESENCE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_presence_failures_total",
        "Total presence upserts that failed (non-fatal)"
    ))
    .unwrap();
    pub static ref DEVICES_MARKED_OFFLINE_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_devices_marked_offline_total",
        "Total devices demoted to offline by the sweeper"
    ))
    .unwrap();
    pub static ref SWEEP_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_sweep_failures_total",
        "Total sweep ticks that failed"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_ingest_latency_seconds",
            "Time taken to persist one report"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref CHANNEL_FULL_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_channel_full_total",
        "Total number of times the ingest channel was full (backpressure events)"
    ))
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY.register(Box::new(REPORTS_TOTAL.clone())).unwrap();
    REGISTRY
        .register(Box::new(REPORTS_DECODED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(DECODE_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(IMAGES_STORED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(STORAGE_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(PRESENCE_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(DEVICES_MARKED_OFFLINE_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(SWEEP_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(INGEST_LATENCY_SECONDS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(CHANNEL_FULL_TOTAL.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
