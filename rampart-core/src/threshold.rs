use crate::config::ThresholdConfig;
use crate::error::ConfigError;
use crate::labels::MetricSelector;
use crate::metric::MetricKind;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The statistic a threshold reads out of a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregation {
    /// `p(q)` with `q` in 0-100, trends only.
    Percentile(f64),
    Avg,
    Min,
    Max,
    Med,
    /// Fraction of `true` observations, rates only.
    Rate,
    /// Total of a counter.
    Count,
    /// Last value of a gauge.
    Value,
}

impl Aggregation {
    /// The metric kind this aggregation can be computed on.
    pub fn kind(&self) -> MetricKind {
        match self {
            Aggregation::Percentile(_)
            | Aggregation::Avg
            | Aggregation::Min
            | Aggregation::Max
            | Aggregation::Med => MetricKind::Trend,
            Aggregation::Rate => MetricKind::Rate,
            Aggregation::Count => MetricKind::Counter,
            Aggregation::Value => MetricKind::Gauge,
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Percentile(q) => write!(f, "p({q})"),
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Count => f.write_str("count"),
            Aggregation::Value => f.write_str("value"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    pub fn compare(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparator::Lt => observed < bound,
            Comparator::Le => observed <= bound,
            Comparator::Gt => observed > bound,
            Comparator::Ge => observed >= bound,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// A parsed threshold expression such as `p(95)<500` or `rate<=0.05`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Predicate {
    pub aggregation: Aggregation,
    pub comparator: Comparator,
    pub bound: f64,
}

impl Predicate {
    /// Whether `observed` satisfies the predicate. NaN never does.
    pub fn holds(&self, observed: f64) -> bool {
        self.comparator.compare(observed, self.bound)
    }
}

impl FromStr for Predicate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expr: String = s.chars().filter(|c| !c.is_whitespace()).collect();

        let idx = expr
            .find(['<', '>'])
            .ok_or_else(|| "missing comparison operator".to_string())?;
        let (lhs, rest) = expr.split_at(idx);

        let (comparator, rhs) = match rest {
            r if r.starts_with("<=") => (Comparator::Le, &r[2..]),
            r if r.starts_with(">=") => (Comparator::Ge, &r[2..]),
            r if r.starts_with('<') => (Comparator::Lt, &r[1..]),
            r => (Comparator::Gt, &r[1..]),
        };

        let aggregation = parse_aggregation(lhs)?;

        let bound: f64 = rhs
            .parse()
            .map_err(|_| format!("bound `{rhs}` is not a number"))?;
        if !bound.is_finite() {
            return Err(format!("bound `{rhs}` is not finite"));
        }

        Ok(Self {
            aggregation,
            comparator,
            bound,
        })
    }
}

fn parse_aggregation(lhs: &str) -> Result<Aggregation, String> {
    let aggregation = match lhs {
        "avg" => Aggregation::Avg,
        "min" => Aggregation::Min,
        "max" => Aggregation::Max,
        "med" => Aggregation::Med,
        "rate" => Aggregation::Rate,
        "count" => Aggregation::Count,
        "value" => Aggregation::Value,
        other => {
            let q = other
                .strip_prefix("p(")
                .and_then(|r| r.strip_suffix(')'))
                .ok_or_else(|| format!("unknown aggregation `{other}`"))?;
            let q: f64 = q
                .parse()
                .map_err(|_| format!("percentile `{q}` is not a number"))?;
            if !(0. ..=100.).contains(&q) {
                return Err(format!("percentile `{q}` is outside 0-100"));
            }
            Aggregation::Percentile(q)
        }
    };
    Ok(aggregation)
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.aggregation, self.comparator, self.bound)
    }
}

/// A pass/fail condition over one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub selector: MetricSelector,
    pub predicate: Predicate,
    /// The expression as written in the configuration.
    pub expression: String,
    /// Stop the run as soon as this threshold is definitely failing.
    pub abort_on_fail: bool,
    /// Grace period before `abort_on_fail` is considered.
    pub delay_abort_eval: Option<Duration>,
}

impl Threshold {
    /// Parse `expression` against `metric`, a metric name optionally followed by a label filter.
    ///
    /// Built-in metrics have known kinds, so an aggregation that can never apply to them is
    /// rejected here rather than failing at evaluation time.
    pub fn parse(metric: &str, expression: &str) -> Result<Self, ConfigError> {
        let selector: MetricSelector = metric.parse()?;
        let predicate: Predicate =
            expression
                .parse()
                .map_err(|reason| ConfigError::InvalidThreshold {
                    expression: expression.to_string(),
                    reason,
                })?;

        if let Some(kind) = MetricKind::builtin(&selector.name) {
            if predicate.aggregation.kind() != kind {
                return Err(ConfigError::ThresholdKindMismatch {
                    metric: selector.name,
                    expression: expression.to_string(),
                    kind,
                });
            }
        }

        Ok(Self {
            selector,
            predicate,
            expression: expression.trim().to_string(),
            abort_on_fail: false,
            delay_abort_eval: None,
        })
    }

    pub fn from_config(metric: &str, config: &ThresholdConfig) -> Result<Self, ConfigError> {
        let mut threshold = Self::parse(metric, config.expression())?;
        if let ThresholdConfig::Detailed {
            abort_on_fail,
            delay_abort_eval,
            ..
        } = config
        {
            threshold.abort_on_fail = *abort_on_fail;
            threshold.delay_abort_eval = *delay_abort_eval;
        }
        Ok(threshold)
    }

    /// Stable identifier, `metric{filter}: expression`.
    pub fn id(&self) -> String {
        format!("{}: {}", self.selector, self.expression)
    }
}
