//! Named boolean assertions over a response (or any subject).
//!
//! ```no_run
//! # async fn doc(ctx: rampart::context::VuContext) {
//! let res = ctx.http().get("/api/products").await;
//! ctx.check(&res)
//!     .that("status is 200", |r| r.status == 200)
//!     .that("has products", |r| r.body.contains("products"))
//!     .error_rate("errors")
//!     .run();
//! # }
//! ```
//!
//! Every predicate is evaluated even if an earlier one failed. Each result is recorded into the
//! built-in `checks` rate with a `check` label. When an error rate is attached, the group adds one
//! observation to it: `true` if any check in the group failed.
use crate::aggregator::Aggregator;
use rampart_core::{Labels, CHECKS, LABEL_CHECK};
use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};
#[allow(unused_imports)]
use tracing::{debug, error, trace, warn};

/// Anything a check predicate may return.
pub trait CheckOutcome {
    fn passed(self) -> bool;
}

impl CheckOutcome for bool {
    fn passed(self) -> bool {
        self
    }
}

impl CheckOutcome for Option<bool> {
    fn passed(self) -> bool {
        self.unwrap_or(false)
    }
}

impl<E> CheckOutcome for Result<bool, E> {
    fn passed(self) -> bool {
        self.unwrap_or(false)
    }
}

/// A named predicate.
pub struct Check<'a, T> {
    name: Cow<'a, str>,
    predicate: Box<dyn Fn(&T) -> bool + 'a>,
}

impl<'a, T> Check<'a, T> {
    pub fn new<P, O>(name: impl Into<Cow<'a, str>>, predicate: P) -> Self
    where
        P: Fn(&T) -> O + 'a,
        O: CheckOutcome,
    {
        Self {
            name: name.into(),
            predicate: Box::new(move |subject| predicate(subject).passed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A panicking predicate is a failed check.
    fn evaluate(&self, subject: &T) -> bool {
        match catch_unwind(AssertUnwindSafe(|| (self.predicate)(subject))) {
            Ok(passed) => passed,
            Err(_) => {
                warn!("Check `{}` panicked; counting it as failed", self.name);
                false
            }
        }
    }
}

/// Evaluate `checks` against `subject`, record the results and return whether all passed.
pub fn run_checks<T>(
    aggregator: &Aggregator,
    subject: &T,
    checks: &[Check<'_, T>],
    error_rate: Option<&str>,
) -> bool {
    run_labelled(aggregator, subject, checks, error_rate, &Labels::new())
}

fn run_labelled<T>(
    aggregator: &Aggregator,
    subject: &T,
    checks: &[Check<'_, T>],
    error_rate: Option<&str>,
    labels: &Labels,
) -> bool {
    let mut all_passed = true;
    for check in checks {
        let passed = check.evaluate(subject);
        if !passed {
            trace!("Check `{}` failed", check.name);
        }
        let labels = labels.clone().with(LABEL_CHECK, check.name());
        aggregator.record_rate(CHECKS, &labels, passed);
        all_passed &= passed;
    }

    if let Some(name) = error_rate {
        aggregator.record_rate(name, labels, !all_passed);
    }

    all_passed
}

/// Builder for a group of checks over one subject.
pub struct Checks<'a, T> {
    aggregator: &'a Aggregator,
    subject: &'a T,
    checks: Vec<Check<'a, T>>,
    error_rate: Option<Cow<'a, str>>,
    labels: Labels,
}

impl<'a, T> Checks<'a, T> {
    pub fn new(aggregator: &'a Aggregator, subject: &'a T) -> Self {
        Self {
            aggregator,
            subject,
            checks: vec![],
            error_rate: None,
            labels: Labels::new(),
        }
    }

    pub fn that<P, O>(mut self, name: impl Into<Cow<'a, str>>, predicate: P) -> Self
    where
        P: Fn(&T) -> O + 'a,
        O: CheckOutcome,
    {
        self.checks.push(Check::new(name, predicate));
        self
    }

    /// Also record the group's outcome into a custom rate metric.
    pub fn error_rate(mut self, name: impl Into<Cow<'a, str>>) -> Self {
        self.error_rate = Some(name.into());
        self
    }

    /// Extra labels attached to every recorded observation.
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key, value);
        self
    }

    pub fn run(self) -> bool {
        run_labelled(
            self.aggregator,
            self.subject,
            &self.checks,
            self.error_rate.as_deref(),
            &self.labels,
        )
    }
}
