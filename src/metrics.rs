use crate::error::{LocatorError, Result};
use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    pub files_indexed: IntCounter,
    pub projects_loaded: IntCounter,
    pub searches_started: IntCounter,
    pub searches_canceled: IntCounter,
    pub declarations_extracted: IntCounter,
    pub cache_evictions: IntCounter,
    registry: Arc<Registry>,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help)).map_err(metrics_error)?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(metrics_error)?;
    Ok(counter)
}

fn metrics_error(e: prometheus::Error) -> LocatorError {
    LocatorError::Other(format!("metrics: {e}"))
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let files_indexed = counter(
            &registry,
            "files_indexed",
            "Number of project files added to the index",
        )?;
        let projects_loaded = counter(
            &registry,
            "projects_loaded",
            "Number of projects indexed",
        )?;
        let searches_started = counter(
            &registry,
            "searches_started",
            "Number of searches the worker started",
        )?;
        let searches_canceled = counter(
            &registry,
            "searches_canceled",
            "Number of searches ended by cancellation",
        )?;
        let declarations_extracted = counter(
            &registry,
            "declarations_extracted",
            "Number of declaration symbols extracted from documents",
        )?;
        let cache_evictions = counter(
            &registry,
            "cache_evictions",
            "Number of declaration cache entries evicted",
        )?;

        Ok(Metrics {
            files_indexed,
            projects_loaded,
            searches_started,
            searches_canceled,
            declarations_extracted,
            cache_evictions,
            registry: Arc::new(registry),
        })
    }

    pub fn gather(&self) -> String {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_lists_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.searches_started.inc();
        metrics.cache_evictions.inc_by(3);

        let text = metrics.gather();
        assert!(text.contains("searches_started 1"));
        assert!(text.contains("cache_evictions 3"));
        assert!(text.contains("files_indexed 0"));
    }
}
