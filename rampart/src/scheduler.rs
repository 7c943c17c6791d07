//! Drives the VU pool along the stage schedule.
//!
//! Once per tick the scheduler computes the desired concurrency for the elapsed time and resizes
//! the pool. Between ticks it sleeps until the next tick, the end of the schedule, or an external
//! abort, whichever comes first.
mod timer;

use crate::context::VuContext;
use crate::executor::VuPool;
use rampart_core::{AbortReason, Schedule};
use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use timer::Timer;
use tokio::sync::watch;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScheduleOutcome {
    Completed,
    Aborted(AbortReason),
}

pub(crate) struct Scheduler {
    schedule: Schedule,
    tick: Duration,
}

impl Scheduler {
    pub fn new(schedule: Schedule, tick: Duration) -> Self {
        Self { schedule, tick }
    }

    /// Run the schedule to completion.
    ///
    /// `on_tick` sees the elapsed time after each resize and may break to end the run early.
    pub async fn run<T, F, C>(
        &self,
        pool: &mut VuPool<T>,
        abort: &mut watch::Receiver<bool>,
        mut on_tick: C,
    ) -> ScheduleOutcome
    where
        T: Fn(VuContext) -> F + Send + Sync + 'static + Clone,
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
        C: FnMut(Duration) -> ControlFlow<AbortReason>,
    {
        let start = Instant::now();
        let deadline = start.checked_add(self.schedule.total_duration());
        let mut timer = Timer::new(self.tick).await;
        debug!(
            "Scheduling every {timer} for {}",
            humantime::format_duration(self.schedule.total_duration())
        );

        loop {
            let elapsed = start.elapsed();
            if self.schedule.is_finished(elapsed) {
                pool.set_concurrency(0);
                info!("Schedule complete after {}", humantime::format_duration(elapsed));
                return ScheduleOutcome::Completed;
            }

            let desired = self
                .schedule
                .desired_at(start.into_std(), Instant::now().into_std());
            pool.set_concurrency(desired);
            pool.reap();
            trace!(
                "t={elapsed:?} desired={desired} in-flight={} busy={}",
                pool.in_flight(),
                pool.busy()
            );

            if let ControlFlow::Break(reason) = on_tick(elapsed) {
                warn!("Aborting run: {reason}");
                return ScheduleOutcome::Aborted(reason);
            }

            tokio::select! {
                gap = timer.tick() => trace!("Tick after {gap:?}"),
                _ = tokio::time::sleep_until(deadline.unwrap_or(start)), if deadline.is_some() => {}
                _ = aborted(abort) => {
                    warn!("Aborting run: {}", AbortReason::External);
                    return ScheduleOutcome::Aborted(AbortReason::External);
                }
            }
        }
    }
}

/// Resolves once the abort flag is raised. A dropped sender never resolves.
async fn aborted(abort: &mut watch::Receiver<bool>) {
    if abort.wait_for(|aborted| *aborted).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::shared;
    use rampart_core::{Labels, Stage, ITERATIONS, VUS};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn scenario() -> impl Fn(VuContext) -> futures::future::BoxFuture<'static, anyhow::Result<()>>
           + Clone
           + Send
           + Sync
           + 'static {
        |_ctx| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn follows_ramp_and_ends_at_zero() {
        let shared = shared(BTreeMap::new());
        let mut pool = VuPool::new(scenario(), shared.clone());
        let (_tx, mut rx) = watch::channel(false);

        let schedule = Schedule::new(vec![Stage::new(secs(4), 10), Stage::new(secs(4), 0)]);
        let scheduler = Scheduler::new(schedule, secs(1));

        let mut seen = vec![];
        let outcome = scheduler
            .run(&mut pool, &mut rx, |elapsed| {
                let vus = shared.aggregator.gauge_value(VUS, &Labels::new()).unwrap_or(0);
                seen.push((elapsed.as_secs(), vus));
                ControlFlow::Continue(())
            })
            .await;

        assert_eq!(outcome, ScheduleOutcome::Completed);
        assert_eq!(pool.concurrency(), 0);
        assert!(seen.contains(&(2, 5)), "{seen:?}");
        assert!(seen.contains(&(4, 10)), "{seen:?}");
        assert!(seen.contains(&(6, 5)), "{seen:?}");

        pool.shutdown(None).await;
        assert!(shared.aggregator.counter_value(ITERATIONS, &Labels::new()).unwrap() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn external_abort_interrupts() {
        let shared = shared(BTreeMap::new());
        let mut pool = VuPool::new(scenario(), shared);
        let (tx, mut rx) = watch::channel(false);

        let schedule = Schedule::new(vec![Stage::new(secs(60), 5)]);
        let scheduler = Scheduler::new(schedule, secs(1));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            let _ = tx.send(true);
        });

        let start = Instant::now();
        let outcome = scheduler.run(&mut pool, &mut rx, |_| ControlFlow::Continue(())).await;
        assert_eq!(outcome, ScheduleOutcome::Aborted(AbortReason::External));
        assert!(start.elapsed() < secs(3));
        pool.shutdown(None).await;
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_schedule_runs_until_aborted() {
        let shared = shared(BTreeMap::new());
        let mut pool = VuPool::new(scenario(), shared);
        let (tx, mut rx) = watch::channel(false);

        let schedule = Schedule::new(vec![Stage::new(Duration::MAX, 2), Stage::new(secs(1), 0)]);
        let scheduler = Scheduler::new(schedule, secs(1));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            let _ = tx.send(true);
        });

        let outcome = scheduler.run(&mut pool, &mut rx, |_| ControlFlow::Continue(())).await;
        assert_eq!(outcome, ScheduleOutcome::Aborted(AbortReason::External));
        pool.shutdown(None).await;
    }

    #[tokio::test(start_paused = true)]
    async fn tick_callback_can_abort() {
        let shared = shared(BTreeMap::new());
        let mut pool = VuPool::new(scenario(), shared);
        let (_tx, mut rx) = watch::channel(false);

        let schedule = Schedule::new(vec![Stage::new(secs(30), 5)]);
        let scheduler = Scheduler::new(schedule, secs(1));

        let ticks = Arc::new(Mutex::new(0));
        let outcome = scheduler
            .run(&mut pool, &mut rx, |elapsed| {
                *ticks.lock().unwrap() += 1;
                if elapsed >= secs(3) {
                    ControlFlow::Break(AbortReason::Threshold("x: rate<0.1".into()))
                } else {
                    ControlFlow::Continue(())
                }
            })
            .await;

        assert_eq!(
            outcome,
            ScheduleOutcome::Aborted(AbortReason::Threshold("x: rate<0.1".into()))
        );
        assert_eq!(*ticks.lock().unwrap(), 4);
        pool.shutdown(None).await;
    }
}
