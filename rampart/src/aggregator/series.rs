use metrics_util::AtomicBucket;
use rampart_core::MetricKind;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Storage for one `name + labels` series.
///
/// Every write path is lock-free: counters and rates are plain atomics and trend samples go into
/// an append-only [`AtomicBucket`].
pub(crate) enum Series {
    Counter(AtomicU64),
    Gauge { value: AtomicI64, max: AtomicI64 },
    Rate { trues: AtomicU64, total: AtomicU64 },
    Trend(AtomicBucket<f64>),
}

impl Series {
    pub fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Series::Counter(AtomicU64::new(0)),
            MetricKind::Gauge => Series::Gauge {
                value: AtomicI64::new(0),
                max: AtomicI64::new(i64::MIN),
            },
            MetricKind::Rate => Series::Rate {
                trues: AtomicU64::new(0),
                total: AtomicU64::new(0),
            },
            MetricKind::Trend => Series::Trend(AtomicBucket::new()),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Series::Counter(_) => MetricKind::Counter,
            Series::Gauge { .. } => MetricKind::Gauge,
            Series::Rate { .. } => MetricKind::Rate,
            Series::Trend(_) => MetricKind::Trend,
        }
    }

    pub fn add(&self, delta: u64) {
        if let Series::Counter(count) = self {
            count.fetch_add(delta, Ordering::Relaxed);
        }
    }

    pub fn set(&self, v: i64) {
        if let Series::Gauge { value, max } = self {
            value.store(v, Ordering::Relaxed);
            max.fetch_max(v, Ordering::Relaxed);
        }
    }

    pub fn observe(&self, v: bool) {
        if let Series::Rate { trues, total } = self {
            // NOTE: `total` is bumped before `trues` and read after it, so a reader never sees
            // more trues than observations.
            total.fetch_add(1, Ordering::SeqCst);
            if v {
                trues.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    pub fn push(&self, v: f64) {
        if let Series::Trend(bucket) = self {
            bucket.push(v);
        }
    }

    pub fn count(&self) -> u64 {
        match self {
            Series::Counter(count) => count.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    pub fn gauge(&self) -> (i64, i64) {
        match self {
            Series::Gauge { value, max } => {
                let value = value.load(Ordering::Relaxed);
                (value, max.load(Ordering::Relaxed).max(value))
            }
            _ => (0, 0),
        }
    }

    /// `(trues, total)` of a rate series.
    pub fn rate_counts(&self) -> (u64, u64) {
        match self {
            Series::Rate { trues, total } => {
                let trues = trues.load(Ordering::SeqCst);
                let total = total.load(Ordering::SeqCst);
                (trues, total)
            }
            _ => (0, 0),
        }
    }

    pub fn extend_samples(&self, out: &mut Vec<f64>) {
        if let Series::Trend(bucket) = self {
            bucket.data_with(|block| out.extend_from_slice(block));
        }
    }
}
