//! Explicitly constructed metrics provider backed by a Prometheus recorder.
//!
//! No global recorder is installed: the provider is created once and passed
//! to the service, pipeline, streaming sessions and senders that record into
//! it. Names are sanitised and prefixed with the service namespace.

use std::fmt;
use std::sync::{Arc, OnceLock};

use metrics::{Counter, Gauge, Histogram, Key, Label, Level, Metadata, Recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use regex::Regex;

fn sanitize(name: &str) -> String {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();
    let re = NON_WORD.get_or_init(|| Regex::new(r"[^\w]+").expect("static pattern compiles"));
    re.replace_all(name, "_").to_lowercase()
}

/// Creates named instruments and renders them in the Prometheus text format.
#[derive(Clone)]
pub struct MetricsProvider {
    inner: Arc<Inner>,
}

struct Inner {
    namespace: String,
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl MetricsProvider {
    /// Creates a provider whose metric names are prefixed with the sanitised
    /// `service_name`.
    #[must_use]
    pub fn new(service_name: &str) -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self {
            inner: Arc::new(Inner {
                namespace: sanitize(service_name),
                recorder,
                handle,
            }),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    #[must_use]
    pub fn counter(&self, name: &str, labels: &[(&str, String)]) -> Counter {
        self.inner
            .recorder
            .register_counter(&self.key(name, labels), &metadata())
    }

    #[must_use]
    pub fn gauge(&self, name: &str, labels: &[(&str, String)]) -> Gauge {
        self.inner
            .recorder
            .register_gauge(&self.key(name, labels), &metadata())
    }

    #[must_use]
    pub fn histogram(&self, name: &str, labels: &[(&str, String)]) -> Histogram {
        self.inner
            .recorder
            .register_histogram(&self.key(name, labels), &metadata())
    }

    /// Prometheus text exposition of everything recorded so far.
    #[must_use]
    pub fn render(&self) -> String {
        self.inner.handle.run_upkeep();
        self.inner.handle.render()
    }

    fn key(&self, name: &str, labels: &[(&str, String)]) -> Key {
        let full = format!("{}_{}", self.inner.namespace, sanitize(name));
        let labels: Vec<Label> = labels
            .iter()
            .map(|(k, v)| Label::new((*k).to_owned(), v.clone()))
            .collect();
        Key::from_parts(full, labels)
    }
}

fn metadata() -> Metadata<'static> {
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()))
}

impl fmt::Debug for MetricsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsProvider")
            .field("namespace", &self.inner.namespace)
            .finish_non_exhaustive()
    }
}
