//! Mirrors aggregator writes onto the `metrics` facade so an installed recorder (Prometheus
//! exporter, etc.) observes the same series.
use metrics::Label;
use rampart_core::Labels;

fn to_labels(labels: &Labels) -> Vec<Label> {
    labels
        .iter()
        .map(|(k, v)| Label::new(k.to_string(), v.to_string()))
        .collect()
}

pub(super) fn counter(name: &str, labels: &Labels, delta: u64) {
    metrics::counter!(name.to_string(), to_labels(labels)).increment(delta);
}

pub(super) fn gauge(name: &str, labels: &Labels, value: i64) {
    metrics::gauge!(name.to_string(), to_labels(labels)).set(value as f64);
}

pub(super) fn rate(name: &str, labels: &Labels, value: bool) {
    let mut labels = to_labels(labels);
    labels.push(Label::new("outcome", if value { "true" } else { "false" }));
    metrics::counter!(name.to_string(), labels).increment(1);
}

pub(super) fn trend(name: &str, labels: &Labels, value: f64) {
    metrics::histogram!(name.to_string(), to_labels(labels)).record(value);
}
