use crate::constants::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a metric series.
///
/// The kind is fixed the first time a metric name is written and holds for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonic sum of deltas.
    Counter,
    /// Last observed value along with the maximum ever seen.
    Gauge,
    /// Fraction of boolean observations that were `true`.
    Rate,
    /// Distribution of numeric samples supporting percentile queries.
    Trend,
}

impl MetricKind {
    /// Kind of a built-in metric, `None` for user-defined names.
    pub fn builtin(name: &str) -> Option<MetricKind> {
        match name {
            HTTP_REQS | ITERATIONS | ITERATIONS_FAILED => Some(MetricKind::Counter),
            VUS => Some(MetricKind::Gauge),
            HTTP_REQ_FAILED | CHECKS | TRANSACTION_FAILED => Some(MetricKind::Rate),
            HTTP_REQ_DURATION
            | HTTP_REQ_WAITING
            | HTTP_REQ_RECEIVING
            | ITERATION_DURATION
            | TRANSACTION_DURATION => Some(MetricKind::Trend),
            _ => None,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Rate => "rate",
            MetricKind::Trend => "trend",
        };
        f.write_str(s)
    }
}

/// How percentiles are read out of a trend's sample set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PercentileMethod {
    /// Smallest sample with at least `q`% of samples at or below it. Always returns an observed
    /// value.
    #[default]
    NearestRank,
    /// Linear interpolation between the two closest ranks (`(n - 1) * q / 100`).
    Linear,
}

impl PercentileMethod {
    /// Percentile `q` (0-100) of an ascending-sorted, non-empty slice.
    pub fn of_sorted(&self, sorted: &[f64], q: f64) -> Option<f64> {
        if sorted.is_empty() {
            return None;
        }
        let q = q.clamp(0., 100.);
        let n = sorted.len();

        let value = match self {
            PercentileMethod::NearestRank => {
                let rank = ((q / 100.) * n as f64).ceil() as usize;
                sorted[rank.clamp(1, n) - 1]
            }
            PercentileMethod::Linear => {
                let pos = (q / 100.) * (n - 1) as f64;
                let lower = pos.floor() as usize;
                let upper = pos.ceil() as usize;
                let frac = pos - lower as f64;
                sorted[lower] + (sorted[upper] - sorted[lower]) * frac
            }
        };
        Some(value)
    }
}
