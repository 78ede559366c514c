/*!
 * # Metrics Module
 *
 * Prometheus counters for the sourcing pipeline, registered on a crate-local
 * registry and exported in the Prometheus text format by [`gather`].
 *
 * ## Metrics
 *
 * - `sourcing_lines_routed_total{outcome}`
 * - `sourcing_movements_created_total{kind}`
 * - `sourcing_shortfall_lines_total`
 * - `sourcing_skipped_sources_total{reason}`
 * - `sourcing_ledger_failures_total`
 * - `sourcing_line_failures_total{code}`
 * - `sourcing_line_duration_seconds`
 */

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Once;
use thiserror::Error;
use tracing::{debug, error};

use crate::models::{Movement, SkippedSource};

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to export metrics: {0}")]
    ExportError(String),
}

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    static ref LINES_ROUTED: IntCounterVec = IntCounterVec::new(
        Opts::new("sourcing_lines_routed_total", "Order lines routed, by outcome"),
        &["outcome"]
    )
    .expect("metric can be created");
    static ref MOVEMENTS_CREATED: IntCounterVec = IntCounterVec::new(
        Opts::new("sourcing_movements_created_total", "Movements committed to the ledger"),
        &["kind"]
    )
    .expect("metric can be created");
    static ref SHORTFALL_LINES: IntCounter = IntCounter::new(
        "sourcing_shortfall_lines_total",
        "Lines whose sources could not cover the requested quantity"
    )
    .expect("metric can be created");
    static ref SKIPPED_SOURCES: IntCounterVec = IntCounterVec::new(
        Opts::new("sourcing_skipped_sources_total", "Candidate sources excluded, by reason"),
        &["reason"]
    )
    .expect("metric can be created");
    static ref LEDGER_FAILURES: IntCounter = IntCounter::new(
        "sourcing_ledger_failures_total",
        "Movement batches rolled back by the ledger"
    )
    .expect("metric can be created");
    static ref LINE_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("sourcing_line_failures_total", "Lines that aborted an order, by error code"),
        &["code"]
    )
    .expect("metric can be created");
    static ref LINE_DURATION: Histogram = Histogram::with_opts(HistogramOpts::new(
        "sourcing_line_duration_seconds",
        "Time spent resolving one order line"
    ))
    .expect("metric can be created");
}

static REGISTER: Once = Once::new();

/// Registers every collector once; later calls are no-ops.
pub fn init() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(LINES_ROUTED.clone()),
            Box::new(MOVEMENTS_CREATED.clone()),
            Box::new(SHORTFALL_LINES.clone()),
            Box::new(SKIPPED_SOURCES.clone()),
            Box::new(LEDGER_FAILURES.clone()),
            Box::new(LINE_FAILURES.clone()),
            Box::new(LINE_DURATION.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                error!("Failed to register metric: {}", e);
            }
        }
        debug!("Sourcing metrics registered");
    });
}

pub fn record_line_routed(outcome: &str) {
    LINES_ROUTED.with_label_values(&[outcome]).inc();
}

pub fn record_movements(movements: &[Movement]) {
    for movement in movements {
        MOVEMENTS_CREATED
            .with_label_values(&[movement.kind.as_str()])
            .inc();
    }
}

pub fn record_shortfall() {
    SHORTFALL_LINES.inc();
}

pub fn record_skipped(skipped: &[SkippedSource]) {
    for source in skipped {
        SKIPPED_SOURCES
            .with_label_values(&[source.reason.as_str()])
            .inc();
    }
}

pub fn record_ledger_failure() {
    LEDGER_FAILURES.inc();
}

pub fn record_line_failure(code: &str) {
    LINE_FAILURES.with_label_values(&[code]).inc();
}

pub fn observe_line_duration(seconds: f64) {
    LINE_DURATION.observe(seconds);
}

pub fn lines_routed(outcome: &str) -> u64 {
    LINES_ROUTED.with_label_values(&[outcome]).get()
}

pub fn ledger_failures() -> u64 {
    LEDGER_FAILURES.get()
}

pub fn line_failures(code: &str) -> u64 {
    LINE_FAILURES.with_label_values(&[code]).get()
}

/// Renders all registered metrics in the Prometheus text format.
pub fn gather() -> Result<String, MetricsError> {
    init();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| MetricsError::ExportError(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| MetricsError::ExportError(e.to_string()))
}
