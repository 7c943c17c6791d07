//! Thread-safe metric stores shared by every virtual user of a run.
//!
//! Metrics are keyed by name and partitioned by [`Labels`]. Writes never block each other:
//! existing series are found through a lock-free snapshot of the registry and updated with
//! atomics, while the first write to a new series publishes a new snapshot (read-copy-update).
//! Reads aggregate every series of a metric whose labels contain the requested filter.
//!
//! Trends keep every sample for the duration of the run and compute exact order statistics on
//! read, using the configured [`PercentileMethod`].
#[cfg(feature = "metrics")]
mod forward;
mod series;

use arc_swap::ArcSwap;
use rampart_core::{Labels, MetricKind, MetricSummary, PercentileMethod};
use series::Series;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
#[allow(unused_imports)]
use tracing::{debug, error, trace, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("Metric `{0}` was never recorded")]
    Unknown(String),

    #[error("Metric `{0}` has no samples")]
    NoSamples(String),

    #[error("Metric `{name}` is a {found}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: MetricKind,
        found: MetricKind,
    },
}

impl ReadError {
    /// `true` when the metric simply has nothing to report yet.
    pub fn is_no_data(&self) -> bool {
        matches!(self, ReadError::Unknown(_) | ReadError::NoSamples(_))
    }
}

#[derive(Clone)]
struct MetricEntry {
    kind: MetricKind,
    series: HashMap<Labels, Arc<Series>>,
    clash_reported: Arc<AtomicBool>,
}

enum Lookup {
    Found(Arc<Series>),
    Missing,
    Clash,
}

#[derive(Clone, Default)]
struct Registry {
    metrics: HashMap<String, MetricEntry>,
}

/// Counters, gauges, rates and trends recorded during a run.
pub struct Aggregator {
    registry: ArcSwap<Registry>,
    percentile: PercentileMethod,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(PercentileMethod::default())
    }
}

impl Aggregator {
    pub fn new(percentile: PercentileMethod) -> Self {
        Self {
            registry: ArcSwap::from_pointee(Registry::default()),
            percentile,
        }
    }

    pub fn percentile_method(&self) -> PercentileMethod {
        self.percentile
    }

    /* Write paths */

    pub fn record_counter(&self, name: &str, labels: &Labels, delta: u64) {
        if let Some(series) = self.series(name, labels, MetricKind::Counter) {
            series.add(delta);
            #[cfg(feature = "metrics")]
            forward::counter(name, labels, delta);
        }
    }

    pub fn record_gauge(&self, name: &str, labels: &Labels, value: i64) {
        if let Some(series) = self.series(name, labels, MetricKind::Gauge) {
            series.set(value);
            #[cfg(feature = "metrics")]
            forward::gauge(name, labels, value);
        }
    }

    pub fn record_rate(&self, name: &str, labels: &Labels, value: bool) {
        if let Some(series) = self.series(name, labels, MetricKind::Rate) {
            series.observe(value);
            #[cfg(feature = "metrics")]
            forward::rate(name, labels, value);
        }
    }

    pub fn record_trend(&self, name: &str, labels: &Labels, value: f64) {
        if !value.is_finite() {
            warn!("Dropping non-finite sample {value} for trend `{name}`");
            return;
        }
        if let Some(series) = self.series(name, labels, MetricKind::Trend) {
            series.push(value);
            #[cfg(feature = "metrics")]
            forward::trend(name, labels, value);
        }
    }

    /// Find or create the series for `name + labels`. `None` if `name` already exists with a
    /// different kind; the write is dropped rather than failing the caller.
    fn series(&self, name: &str, labels: &Labels, kind: MetricKind) -> Option<Arc<Series>> {
        match self.lookup(name, labels, kind) {
            Lookup::Found(series) => return Some(series),
            Lookup::Clash => return None,
            Lookup::Missing => {}
        }

        trace!("Registering series {name}{labels}");
        self.registry.rcu(|current| {
            let mut registry = Registry::clone(current);
            let entry = registry
                .metrics
                .entry(name.to_string())
                .or_insert_with(|| MetricEntry {
                    kind,
                    series: HashMap::new(),
                    clash_reported: Arc::new(AtomicBool::new(false)),
                });
            if entry.kind == kind {
                entry
                    .series
                    .entry(labels.clone())
                    .or_insert_with(|| Arc::new(Series::new(kind)));
            }
            registry
        });

        match self.lookup(name, labels, kind) {
            Lookup::Found(series) => Some(series),
            Lookup::Clash | Lookup::Missing => None,
        }
    }

    fn lookup(&self, name: &str, labels: &Labels, kind: MetricKind) -> Lookup {
        let registry = self.registry.load();
        let Some(entry) = registry.metrics.get(name) else {
            return Lookup::Missing;
        };
        if entry.kind != kind {
            if !entry.clash_reported.swap(true, Ordering::Relaxed) {
                warn!(
                    "Metric `{name}` is a {}; ignoring writes as a {kind}",
                    entry.kind
                );
            }
            return Lookup::Clash;
        }
        match entry.series.get(labels) {
            Some(series) => Lookup::Found(series.clone()),
            None => Lookup::Missing,
        }
    }

    /* Read paths */

    pub fn metric_kind(&self, name: &str) -> Option<MetricKind> {
        self.registry.load().metrics.get(name).map(|e| e.kind)
    }

    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.registry.load().metrics.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every series of `name` whose labels contain `filter`.
    fn matching(
        &self,
        name: &str,
        filter: &Labels,
        expected: MetricKind,
    ) -> Result<Vec<Arc<Series>>, ReadError> {
        let registry = self.registry.load();
        let entry = registry
            .metrics
            .get(name)
            .ok_or_else(|| ReadError::Unknown(name.to_string()))?;

        if entry.kind != expected {
            return Err(ReadError::KindMismatch {
                name: name.to_string(),
                expected,
                found: entry.kind,
            });
        }

        let series: Vec<_> = entry
            .series
            .iter()
            .filter(|(labels, _)| filter.is_subset_of(labels))
            .map(|(_, s)| s.clone())
            .collect();

        if series.is_empty() {
            Err(ReadError::NoSamples(format!("{name}{filter}")))
        } else {
            Ok(series)
        }
    }

    pub fn counter_value(&self, name: &str, filter: &Labels) -> Result<u64, ReadError> {
        let series = self.matching(name, filter, MetricKind::Counter)?;
        Ok(series.iter().map(|s| s.count()).sum())
    }

    /// Current value summed over matching series.
    pub fn gauge_value(&self, name: &str, filter: &Labels) -> Result<i64, ReadError> {
        let series = self.matching(name, filter, MetricKind::Gauge)?;
        Ok(series.iter().map(|s| s.gauge().0).sum())
    }

    /// `(trues, total)` over matching series.
    pub fn rate_counts(&self, name: &str, filter: &Labels) -> Result<(u64, u64), ReadError> {
        let series = self.matching(name, filter, MetricKind::Rate)?;
        Ok(series
            .iter()
            .map(|s| s.rate_counts())
            .fold((0, 0), |(t, n), (st, sn)| (t + st, n + sn)))
    }

    /// Fraction of `true` observations. A rate without observations is an error, never `0.0`.
    pub fn rate_value(&self, name: &str, filter: &Labels) -> Result<f64, ReadError> {
        match self.rate_counts(name, filter)? {
            (_, 0) => Err(ReadError::NoSamples(format!("{name}{filter}"))),
            (trues, total) => Ok(trues as f64 / total as f64),
        }
    }

    /// Ascending-sorted samples of every matching trend series.
    pub fn trend_samples(&self, name: &str, filter: &Labels) -> Result<Vec<f64>, ReadError> {
        let series = self.matching(name, filter, MetricKind::Trend)?;
        let mut samples = vec![];
        for s in &series {
            s.extend_samples(&mut samples);
        }
        if samples.is_empty() {
            return Err(ReadError::NoSamples(format!("{name}{filter}")));
        }
        samples.sort_by(f64::total_cmp);
        Ok(samples)
    }

    pub fn percentile(&self, name: &str, filter: &Labels, q: f64) -> Result<f64, ReadError> {
        let samples = self.trend_samples(name, filter)?;
        self.percentile
            .of_sorted(&samples, q)
            .ok_or_else(|| ReadError::NoSamples(name.to_string()))
    }

    /// Per-metric summary over all label sets. `elapsed` scales counter rates.
    pub fn summarize(&self, elapsed: Duration) -> BTreeMap<String, MetricSummary> {
        let all = Labels::new();
        let mut out = BTreeMap::new();

        for name in self.metric_names() {
            let Some(kind) = self.metric_kind(&name) else {
                continue;
            };

            let summary = match kind {
                MetricKind::Counter => self.counter_value(&name, &all).ok().map(|count| {
                    let secs = elapsed.as_secs_f64();
                    MetricSummary::Counter {
                        count,
                        rate: if secs > 0. { count as f64 / secs } else { 0. },
                    }
                }),
                MetricKind::Gauge => self.matching(&name, &all, kind).ok().map(|series| {
                    let (value, max) = series
                        .iter()
                        .map(|s| s.gauge())
                        .fold((0, i64::MIN), |(v, m), (sv, sm)| (v + sv, m.max(sm)));
                    MetricSummary::Gauge { value, max }
                }),
                MetricKind::Rate => {
                    self.rate_counts(&name, &all)
                        .ok()
                        .map(|(passes, total)| MetricSummary::Rate {
                            rate: (total > 0).then(|| passes as f64 / total as f64),
                            passes,
                            fails: total - passes,
                        })
                }
                MetricKind::Trend => self
                    .trend_samples(&name, &all)
                    .ok()
                    .map(|samples| self.trend_summary(&samples)),
            };

            if let Some(summary) = summary {
                out.insert(name, summary);
            }
        }

        out
    }

    fn trend_summary(&self, sorted: &[f64]) -> MetricSummary {
        let p = |q| self.percentile.of_sorted(sorted, q).unwrap_or(f64::NAN);
        MetricSummary::Trend {
            count: sorted.len(),
            avg: statistical::mean(sorted),
            min: sorted[0],
            med: p(50.),
            max: sorted[sorted.len() - 1],
            p90: p(90.),
            p95: p(95.),
            p99: p(99.),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_core::labels;

    #[test]
    fn counter_sums_deltas_across_labels() {
        let agg = Aggregator::default();
        let get = labels! { "method" => "GET" };
        let post = labels! { "method" => "POST" };
        agg.record_counter("http_reqs", &get, 2);
        agg.record_counter("http_reqs", &get, 3);
        agg.record_counter("http_reqs", &post, 1);

        assert_eq!(agg.counter_value("http_reqs", &get), Ok(5));
        assert_eq!(agg.counter_value("http_reqs", &Labels::new()), Ok(6));
    }

    #[test]
    fn rate_seven_of_ten() {
        let agg = Aggregator::default();
        let labels = Labels::new();
        for i in 0..10 {
            agg.record_rate("checks", &labels, i < 7);
        }
        assert_eq!(agg.rate_value("checks", &labels), Ok(0.7));
    }

    #[test]
    fn rate_without_observations_is_insufficient_data() {
        let agg = Aggregator::default();
        let err = agg.rate_value("errors", &Labels::new()).unwrap_err();
        assert!(err.is_no_data());

        agg.record_rate("errors", &labels! { "check" => "a" }, true);
        let err = agg
            .rate_value("errors", &labels! { "check" => "b" })
            .unwrap_err();
        assert!(matches!(err, ReadError::NoSamples(_)));
    }

    #[test]
    fn trend_percentiles_are_order_independent() {
        let agg = Aggregator::default();
        let labels = Labels::new();
        for v in [900., 100., 100., 100., 100.] {
            agg.record_trend("http_req_duration", &labels, v);
        }

        assert_eq!(agg.percentile("http_req_duration", &labels, 80.), Ok(100.));
        let p95 = agg.percentile("http_req_duration", &labels, 95.).unwrap();
        assert!((100. ..=900.).contains(&p95));
    }

    #[test]
    fn linear_percentile_method() {
        let agg = Aggregator::new(PercentileMethod::Linear);
        let labels = Labels::new();
        for v in 1..=5 {
            agg.record_trend("latency", &labels, v as f64);
        }
        assert_eq!(agg.percentile("latency", &labels, 50.), Ok(3.));
        assert_eq!(agg.percentile("latency", &labels, 75.), Ok(4.));
    }

    #[test]
    fn filter_selects_sub_series() {
        let agg = Aggregator::default();
        agg.record_trend("lat", &labels! { "route" => "/a", "status" => "200" }, 10.);
        agg.record_trend("lat", &labels! { "route" => "/b", "status" => "200" }, 1000.);

        let a = labels! { "route" => "/a" };
        assert_eq!(agg.percentile("lat", &a, 100.), Ok(10.));
        assert_eq!(agg.percentile("lat", &Labels::new(), 100.), Ok(1000.));
    }

    #[tracing_test::traced_test]
    #[test]
    fn kind_clash_keeps_first_kind() {
        let agg = Aggregator::default();
        let labels = Labels::new();
        agg.record_counter("iterations", &labels, 1);
        for _ in 0..3 {
            agg.record_trend("iterations", &labels, 5.);
        }
        agg.record_rate("iterations", &labels, true);
        logs_assert(|lines: &[&str]| {
            match lines.iter().filter(|l| l.contains("ignoring writes")).count() {
                1 => Ok(()),
                n => Err(format!("kind clash logged {n} times")),
            }
        });

        assert_eq!(agg.metric_kind("iterations"), Some(MetricKind::Counter));
        assert_eq!(agg.counter_value("iterations", &labels), Ok(1));
        assert!(matches!(
            agg.trend_samples("iterations", &labels),
            Err(ReadError::KindMismatch { .. })
        ));
    }

    #[test]
    fn non_finite_samples_are_dropped() {
        let agg = Aggregator::default();
        agg.record_trend("lat", &Labels::new(), f64::NAN);
        assert!(agg.trend_samples("lat", &Labels::new()).unwrap_err().is_no_data());
    }

    #[test]
    fn summary_covers_every_kind() {
        let agg = Aggregator::default();
        let labels = Labels::new();
        agg.record_counter("http_reqs", &labels, 10);
        agg.record_gauge("vus", &labels, 4);
        agg.record_gauge("vus", &labels, 2);
        agg.record_rate("checks", &labels, true);
        agg.record_rate("checks", &labels, false);
        for v in [1., 2., 3., 4.] {
            agg.record_trend("iteration_duration", &labels, v);
        }

        let summary = agg.summarize(Duration::from_secs(5));
        assert_eq!(
            summary["http_reqs"],
            MetricSummary::Counter {
                count: 10,
                rate: 2.
            }
        );
        assert_eq!(summary["vus"], MetricSummary::Gauge { value: 2, max: 4 });
        assert_eq!(
            summary["checks"],
            MetricSummary::Rate {
                rate: Some(0.5),
                passes: 1,
                fails: 1
            }
        );
        match &summary["iteration_duration"] {
            MetricSummary::Trend {
                count,
                avg,
                min,
                med,
                max,
                ..
            } => {
                assert_eq!((*count, *avg, *min, *max), (4, 2.5, 1., 4.));
                assert_eq!(Ok(*med), agg.percentile("iteration_duration", &labels, 50.));
                assert_eq!(*med, 2.);
            }
            other => panic!("unexpected summary {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_counter_writes_are_not_lost() {
        for _ in 0..20 {
            let agg = Arc::new(Aggregator::default());
            let handles: Vec<_> = (0..200u64)
                .map(|i| {
                    let agg = agg.clone();
                    tokio::spawn(async move {
                        let labels = labels! { "vu" => (i % 7).to_string() };
                        for _ in 0..50 {
                            agg.record_counter("iterations", &labels, i + 1);
                            tokio::task::yield_now().await;
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.await.unwrap();
            }

            let expected: u64 = (1..=200u64).map(|d| d * 50).sum();
            assert_eq!(agg.counter_value("iterations", &Labels::new()), Ok(expected));
        }
    }
}
