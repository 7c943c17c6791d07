use crate::config::HumanDuration;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::{Duration, Instant};

/// A timed segment of a run: concurrency ramps linearly to `target` over `duration`.
///
/// A zero `duration` jumps straight to `target`.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde_as(as = "HumanDuration")]
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// Piecewise-linear concurrency envelope built from an ordered list of stages.
///
/// All methods are pure functions of elapsed time, so the envelope can be tested without a
/// clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    stages: Vec<Stage>,
    start: usize,
    total: Duration,
}

impl Schedule {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self::with_start(stages, 0)
    }

    /// Schedule whose first stage ramps from `start` rather than from zero.
    pub fn with_start(stages: Vec<Stage>, start: usize) -> Self {
        let total = stages
            .iter()
            .fold(Duration::ZERO, |total, s| total.saturating_add(s.duration));
        Self {
            stages,
            start,
            total,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Sum of every stage duration. The run ends once this much time has elapsed.
    pub fn total_duration(&self) -> Duration {
        self.total
    }

    pub fn is_finished(&self, elapsed: Duration) -> bool {
        elapsed >= self.total
    }

    /// Largest concurrency the envelope ever asks for.
    pub fn peak(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.target)
            .chain(std::iter::once(self.start))
            .max()
            .unwrap_or(0)
    }

    /// Desired number of virtual users `elapsed` after the run started.
    ///
    /// Interpolates between the previous stage's target (or the start value) and the target of
    /// the stage active at `elapsed`, rounding to the nearest whole user. Returns 0 once the
    /// schedule has finished.
    pub fn desired_concurrency(&self, elapsed: Duration) -> usize {
        let mut stage_start = Duration::ZERO;
        let mut prev = self.start as f64;

        for stage in &self.stages {
            let stage_end = stage_start.saturating_add(stage.duration);
            if elapsed < stage_end {
                let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let target = stage.target as f64;
                return (prev + (target - prev) * progress).round() as usize;
            }
            stage_start = stage_end;
            prev = stage.target as f64;
        }

        0
    }

    /// Desired concurrency at wall-clock `now` for a run started at `start`. Instants before the
    /// run started yield 0.
    pub fn desired_at(&self, start: Instant, now: Instant) -> usize {
        now.checked_duration_since(start)
            .map_or(0, |elapsed| self.desired_concurrency(elapsed))
    }
}
