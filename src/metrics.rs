use crate::error::ExplorerError;

use lazy_static::lazy_static;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};
use std::path::Path;

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Object store reads by outcome
    pub static ref OBJECT_FETCHES: IntCounterVec = IntCounterVec::new(
        Opts::new("object_fetches", "The number of objects requested from the store"),
        &["outcome"]
    ).unwrap();
    // Decoded chunk cache lookups
    pub static ref CHUNK_CACHE_LOOKUPS: IntCounterVec = IntCounterVec::new(
        Opts::new("chunk_cache_lookups", "The number of decoded chunk cache lookups"),
        &["result"]
    ).unwrap();
    // Materialisations by outcome
    pub static ref MATERIALISATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("materialisations", "The number of lazy arrays materialised"),
        &["outcome"]
    ).unwrap();
    // Retried materialisation attempts
    pub static ref MATERIALISATION_RETRIES: IntCounter = IntCounter::new(
        "materialisation_retries",
        "The number of materialisation attempts retried after a transient failure"
    ).unwrap();
    // Materialisation histogram by duration
    pub static ref MATERIALISATION_TIME: Histogram = Histogram::with_opts(
        HistogramOpts::new("materialisation_time", "The time taken to materialise each lazy array")
            .buckets(prometheus::exponential_buckets(0.01, 4.0, 10).unwrap())
    ).unwrap();
    // Figures handed to the display surface
    pub static ref FIGURES_RENDERED: IntCounterVec = IntCounterVec::new(
        Opts::new("figures_rendered", "The number of figures rendered"),
        &["plot"]
    ).unwrap();
}

pub fn register_metrics() {
    REGISTRY
        .register(Box::new(OBJECT_FETCHES.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(CHUNK_CACHE_LOOKUPS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(MATERIALISATIONS.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(MATERIALISATION_RETRIES.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(MATERIALISATION_TIME.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(FIGURES_RENDERED.clone()))
        .unwrap();
}

/// Returns the registered metrics in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();

    encoder.encode(&REGISTRY.gather(), &mut buffer).unwrap();

    String::from_utf8(buffer).unwrap()
}

/// Writes the registered metrics to a file in the Prometheus text format.
pub fn write_metrics(path: &Path) -> Result<(), ExplorerError> {
    std::fs::write(path, gather_metrics()).map_err(|source| ExplorerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_work_without_registration() {
        let before = FIGURES_RENDERED.with_label_values(&["test"]).get();
        FIGURES_RENDERED.with_label_values(&["test"]).inc();
        assert_eq!(before + 1, FIGURES_RENDERED.with_label_values(&["test"]).get());
    }

    #[test]
    fn write_metrics_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.prom");
        write_metrics(&path).unwrap();
        assert!(path.exists());
    }
}
