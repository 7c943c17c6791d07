//! Evaluates thresholds against the aggregator.
//!
//! Evaluation only reads metric state, so it can run mid-run for `abortOnFail` thresholds and
//! again at the end of the run, with the same result for the same state.
use crate::aggregator::{Aggregator, ReadError};
use rampart_core::{
    AbortReason, Aggregation, RunVerdict, Threshold, ThresholdOutcome, ThresholdStatus,
};
use std::ops::ControlFlow;
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Evaluate every threshold. An empty list passes.
pub fn evaluate(thresholds: &[Threshold], aggregator: &Aggregator) -> RunVerdict {
    RunVerdict::from_outcomes(
        thresholds
            .iter()
            .map(|t| evaluate_one(t, aggregator))
            .collect(),
    )
}

pub fn evaluate_one(threshold: &Threshold, aggregator: &Aggregator) -> ThresholdOutcome {
    let (status, observed, reason) = match observe(threshold, aggregator) {
        Ok(value) if threshold.predicate.holds(value) => (ThresholdStatus::Pass, Some(value), None),
        Ok(value) => (ThresholdStatus::Fail, Some(value), None),
        Err(err) if err.is_no_data() => (ThresholdStatus::NoData, None, Some(err.to_string())),
        Err(err) => (ThresholdStatus::Fail, None, Some(err.to_string())),
    };

    ThresholdOutcome {
        id: threshold.id(),
        metric: threshold.selector.to_string(),
        expression: threshold.expression.clone(),
        status,
        observed,
        reason,
    }
}

/// The aggregate value a threshold compares against its bound.
pub fn observe(threshold: &Threshold, aggregator: &Aggregator) -> Result<f64, ReadError> {
    let name = threshold.selector.name.as_str();
    let filter = &threshold.selector.filter;

    match threshold.predicate.aggregation {
        Aggregation::Percentile(q) => aggregator.percentile(name, filter, q),
        Aggregation::Med => aggregator.percentile(name, filter, 50.),
        Aggregation::Avg => {
            let samples = aggregator.trend_samples(name, filter)?;
            Ok(statistical::mean(&samples))
        }
        Aggregation::Min => {
            let samples = aggregator.trend_samples(name, filter)?;
            Ok(samples[0])
        }
        Aggregation::Max => {
            let samples = aggregator.trend_samples(name, filter)?;
            Ok(samples[samples.len() - 1])
        }
        Aggregation::Rate => aggregator.rate_value(name, filter),
        Aggregation::Count => aggregator.counter_value(name, filter).map(|c| c as f64),
        Aggregation::Value => aggregator.gauge_value(name, filter).map(|v| v as f64),
    }
}

/// Check the run's `abortOnFail` thresholds at `elapsed` into the run.
///
/// Thresholds still inside their `delayAbortEval` window, or without data yet, never abort.
pub fn abort_check<'a>(
    thresholds: impl IntoIterator<Item = &'a Threshold>,
    aggregator: &Aggregator,
    elapsed: Duration,
) -> ControlFlow<AbortReason> {
    for threshold in thresholds {
        if threshold
            .delay_abort_eval
            .is_some_and(|delay| elapsed < delay)
        {
            continue;
        }

        let outcome = evaluate_one(threshold, aggregator);
        if outcome.status == ThresholdStatus::Fail {
            error!("{outcome}");
            return ControlFlow::Break(AbortReason::Threshold(outcome.id));
        }
    }

    ControlFlow::Continue(())
}
