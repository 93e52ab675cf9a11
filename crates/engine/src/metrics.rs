//! Prometheus metrics for the scan engine.
//!
//! Metrics live in a process-wide registry and carry no code values, only
//! aggregate counts.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static REGISTER_ONCE: Once = Once::new();

// Scan metrics
pub static SCAN_OUTCOMES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tally_scan_outcomes_total",
            "Scan attempts by outcome (success, duplicate, unknown)",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static SCAN_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tally_scan_errors_total",
            "Scan attempts that failed with an error, by error code",
        ),
        &["error"],
    )
    .expect("metric creation failed")
});

// Existence cache metrics
pub static CACHE_RELOADS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tally_cache_reloads_total",
        "Total number of full existence cache reloads",
    )
    .expect("metric creation failed")
});

pub static CACHE_SIZE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "tally_cache_size",
        "Number of codes currently held in the existence cache",
    )
    .expect("metric creation failed")
});

// Ingestion metrics
pub static INGESTED_CODES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tally_ingested_codes_total",
            "Ingested codes by classification (new, known)",
        ),
        &["classification"],
    )
    .expect("metric creation failed")
});

/// Register all metrics with the global registry.
///
/// Idempotent; calls after the first are no-ops.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(SCAN_OUTCOMES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SCAN_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_RELOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_SIZE.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INGESTED_CODES.clone()))
            .expect("metric registration failed");
    });
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_metrics() -> String {
    register_metrics();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub(crate) fn record_scan_outcome(outcome: &str) {
    SCAN_OUTCOMES.with_label_values(&[outcome]).inc();
}

pub(crate) fn record_scan_error(error: &str) {
    SCAN_ERRORS.with_label_values(&[error]).inc();
}

pub(crate) fn record_ingested(new: usize, known: usize) {
    INGESTED_CODES
        .with_label_values(&["new"])
        .inc_by(new as u64);
    INGESTED_CODES
        .with_label_values(&["known"])
        .inc_by(known as u64);
}
