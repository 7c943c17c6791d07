use crate::config::HumanDuration;
use crate::constants::*;
use serde::Serialize;
use serde_with::serde_as;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdStatus {
    Pass,
    Fail,
    /// The metric was never written or has no samples. Counts as a failure.
    NoData,
}

/// Result of evaluating one threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    pub id: String,
    pub metric: String,
    pub expression: String,
    pub status: ThresholdStatus,
    pub observed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ThresholdOutcome {
    pub fn passed(&self) -> bool {
        self.status == ThresholdStatus::Pass
    }
}

impl fmt::Display for ThresholdOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = match self.status {
            ThresholdStatus::Pass => "PASS",
            ThresholdStatus::Fail => "FAIL",
            ThresholdStatus::NoData => "NO DATA",
        };
        write!(f, "[{mark}] {}", self.id)?;
        if let Some(observed) = self.observed {
            write!(f, " (observed {observed:.3})")?;
        }
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

/// Pass/fail verdict of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunVerdict {
    pub thresholds: Vec<ThresholdOutcome>,
    pub overall_pass: bool,
}

impl RunVerdict {
    /// `overall_pass` holds iff every outcome passed. An empty threshold list passes.
    pub fn from_outcomes(thresholds: Vec<ThresholdOutcome>) -> Self {
        let overall_pass = thresholds.iter().all(ThresholdOutcome::passed);
        Self {
            thresholds,
            overall_pass,
        }
    }

    pub fn per_threshold(&self) -> BTreeMap<&str, bool> {
        self.thresholds
            .iter()
            .map(|t| (t.id.as_str(), t.passed()))
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ThresholdOutcome> {
        self.thresholds.iter().filter(|t| !t.passed())
    }
}

/// End-of-run view of a single metric, aggregated over all of its label sets.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricSummary {
    Counter {
        count: u64,
        /// Per second of run time.
        rate: f64,
    },
    Gauge {
        value: i64,
        max: i64,
    },
    Rate {
        rate: Option<f64>,
        passes: u64,
        fails: u64,
    },
    Trend {
        count: usize,
        avg: f64,
        min: f64,
        med: f64,
        max: f64,
        p90: f64,
        p95: f64,
        p99: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "by", content = "threshold", rename_all = "snake_case")]
pub enum AbortReason {
    /// An `abortOnFail` threshold failed mid-run.
    Threshold(String),
    /// Stopped through an abort handle.
    External,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Threshold(id) => write!(f, "threshold `{id}` failed"),
            AbortReason::External => f.write_str("external abort"),
        }
    }
}

/// Machine-readable result of a run.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub name: String,
    #[serde_as(as = "HumanDuration")]
    pub elapsed: Duration,
    pub aborted: Option<AbortReason>,
    pub verdict: RunVerdict,
    pub metrics: BTreeMap<String, MetricSummary>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.verdict.overall_pass && self.aborted.is_none()
    }

    /// Process exit status for this report.
    pub fn exit_code(&self) -> u8 {
        match &self.aborted {
            Some(AbortReason::Threshold(_)) => EXIT_THRESHOLDS_FAILED,
            Some(AbortReason::External) => EXIT_EXTERNAL_ABORT,
            None if self.verdict.overall_pass => EXIT_PASS,
            None => EXIT_THRESHOLDS_FAILED,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, status: ThresholdStatus) -> ThresholdOutcome {
        ThresholdOutcome {
            id: id.to_string(),
            metric: "m".to_string(),
            expression: "rate<0.05".to_string(),
            status,
            observed: None,
            reason: None,
        }
    }

    fn report(verdict: RunVerdict, aborted: Option<AbortReason>) -> RunReport {
        RunReport {
            name: "test".to_string(),
            elapsed: Duration::from_secs(4),
            aborted,
            verdict,
            metrics: BTreeMap::new(),
        }
    }

    #[test]
    fn no_data_fails_the_verdict() {
        let verdict = RunVerdict::from_outcomes(vec![
            outcome("a", ThresholdStatus::Pass),
            outcome("b", ThresholdStatus::NoData),
        ]);
        assert!(!verdict.overall_pass);
        assert_eq!(verdict.per_threshold()["a"], true);
        assert_eq!(verdict.per_threshold()["b"], false);
        assert_eq!(verdict.failures().count(), 1);
    }

    #[test]
    fn empty_verdict_passes() {
        assert!(RunVerdict::from_outcomes(vec![]).overall_pass);
    }

    #[test]
    fn exit_codes() {
        let pass = RunVerdict::from_outcomes(vec![outcome("a", ThresholdStatus::Pass)]);
        let fail = RunVerdict::from_outcomes(vec![outcome("a", ThresholdStatus::Fail)]);

        assert_eq!(report(pass.clone(), None).exit_code(), EXIT_PASS);
        assert_eq!(report(fail, None).exit_code(), EXIT_THRESHOLDS_FAILED);
        assert_eq!(
            report(pass.clone(), Some(AbortReason::Threshold("a".into()))).exit_code(),
            EXIT_THRESHOLDS_FAILED
        );
        assert_eq!(
            report(pass, Some(AbortReason::External)).exit_code(),
            EXIT_EXTERNAL_ABORT
        );
    }

    #[test]
    fn json_summary_lists_thresholds() {
        let mut outcome = outcome("http_req_failed: rate<0.05", ThresholdStatus::Pass);
        outcome.observed = Some(0.01);
        let report = report(RunVerdict::from_outcomes(vec![outcome]), None);

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["elapsed"], "4s");
        assert_eq!(json["verdict"]["overall_pass"], true);
        assert_eq!(json["verdict"]["thresholds"][0]["status"], "pass");
        assert_eq!(json["verdict"]["thresholds"][0]["observed"], 0.01);
    }
}
