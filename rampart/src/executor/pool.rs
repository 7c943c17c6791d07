use super::virtual_user::{VirtualUser, VuState};
use crate::context::{RunShared, VuContext};
use rampart_core::{Labels, VUS};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// The set of virtual users of a run.
///
/// Growing spawns new VUs immediately. Shrinking signals the most recently started VUs to stop at
/// their next iteration boundary and parks them as retiring until their task finishes.
pub(crate) struct VuPool<T> {
    scenario: T,
    shared: Arc<RunShared>,
    active: Vec<VirtualUser>,
    retiring: Vec<VirtualUser>,
    next_id: u64,
    run_stopped: Arc<AtomicBool>,
}

impl<T, F> VuPool<T>
where
    T: Fn(VuContext) -> F + Send + Sync + 'static + Clone,
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    pub fn new(scenario: T, shared: Arc<RunShared>) -> Self {
        Self {
            scenario,
            shared,
            active: vec![],
            retiring: vec![],
            next_id: 1,
            run_stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_concurrency(&mut self, concurrency: usize) {
        if self.active.len() == concurrency {
            return;
        } else if self.active.len() > concurrency {
            for vu in self.active.drain(concurrency..) {
                vu.signal_stop();
                self.retiring.push(vu);
            }
        } else {
            while self.active.len() < concurrency {
                let vu = VirtualUser::spawn(
                    self.next_id,
                    self.scenario.clone(),
                    self.shared.clone(),
                    self.run_stopped.clone(),
                );
                self.next_id += 1;
                self.active.push(vu);
            }
        }

        trace!("Concurrency set to {concurrency}");
        self.shared
            .aggregator
            .record_gauge(VUS, &Labels::new(), concurrency as i64);
    }

    pub fn concurrency(&self) -> usize {
        self.active.len()
    }

    /// Active VUs plus retiring VUs still finishing an iteration.
    pub fn in_flight(&self) -> usize {
        self.active.len() + self.retiring.len()
    }

    pub fn busy(&self) -> usize {
        self.active
            .iter()
            .chain(self.retiring.iter())
            .filter(|vu| vu.state() == VuState::Running)
            .count()
    }

    /// Forget retiring VUs whose task has ended.
    pub fn reap(&mut self) {
        self.retiring.retain(|vu| !vu.is_finished());
    }

    /// Stop every VU and wait for in-flight iterations.
    ///
    /// Without a graceful stop the wait is unbounded; with one, VUs still running when it expires
    /// are aborted.
    pub async fn shutdown(mut self, graceful_stop: Option<Duration>) {
        self.run_stopped.store(true, Ordering::Release);
        let mut users: Vec<_> = self.active.drain(..).chain(self.retiring.drain(..)).collect();
        for vu in &users {
            vu.signal_stop();
        }

        debug!("Waiting on {} VUs to finish", users.len());
        let results = {
            let join = futures::future::join_all(users.iter_mut().map(|vu| &mut vu.handle));
            match graceful_stop {
                Some(limit) => tokio::time::timeout(limit, join).await.ok(),
                None => Some(join.await),
            }
        };

        match results {
            Some(results) => {
                for err in results.into_iter().filter_map(Result::err) {
                    error!("VU task failed: {err}");
                }
            }
            None => {
                let stragglers: Vec<_> = users.iter().filter(|vu| !vu.is_finished()).collect();
                warn!(
                    "Graceful stop expired; interrupting {} VUs",
                    stragglers.len()
                );
                for vu in stragglers {
                    trace!("Aborting VU {}", vu.id());
                    vu.abort();
                }
            }
        }

        self.shared.aggregator.record_gauge(VUS, &Labels::new(), 0);
    }
}

impl<T> Drop for VuPool<T> {
    fn drop(&mut self) {
        self.run_stopped.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::shared;
    use rampart_core::ITERATIONS;
    use rand_distr::{Distribution, SkewNormal};
    use std::collections::BTreeMap;

    macro_rules! mock_scenario {
        ($m:expr, $s:expr) => {
            |_ctx: VuContext| async {
                let mean: Duration = $m;
                let std: Duration = $s;
                let normal = SkewNormal::new(mean.as_secs_f64(), std.as_secs_f64(), 20.).unwrap();
                let v: f64 = normal.sample(&mut rand::thread_rng()).max(0.);
                tokio::time::sleep(Duration::from_secs_f64(v)).await;
                Ok(())
            }
        };
    }

    #[tokio::test(start_paused = true)]
    async fn grows_and_shrinks() {
        let shared = shared(BTreeMap::new());
        let mut pool = VuPool::new(
            mock_scenario!(Duration::from_millis(100), Duration::from_millis(20)),
            shared.clone(),
        );

        pool.set_concurrency(10);
        assert_eq!(pool.concurrency(), 10);
        assert_eq!(shared.aggregator.gauge_value(VUS, &Labels::new()), Ok(10));

        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.set_concurrency(4);
        assert_eq!(pool.concurrency(), 4);
        assert_eq!(pool.in_flight(), 10);

        tokio::time::sleep(Duration::from_secs(1)).await;
        pool.reap();
        assert_eq!(pool.in_flight(), 4);

        pool.shutdown(None).await;
        assert_eq!(shared.aggregator.gauge_value(VUS, &Labels::new()), Ok(0));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_iterations() {
        let shared = shared(BTreeMap::new());
        let mut pool = VuPool::new(
            |_ctx| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok(())
            },
            shared.clone(),
        );

        pool.set_concurrency(5);
        tokio::time::sleep(Duration::from_secs(1)).await;
        pool.shutdown(None).await;

        assert_eq!(
            shared.aggregator.counter_value(ITERATIONS, &Labels::new()),
            Ok(5)
        );
    }

    #[tracing_test::traced_test]
    #[tokio::test(start_paused = true)]
    async fn graceful_stop_interrupts_stragglers() {
        let shared = shared(BTreeMap::new());
        let mut pool = VuPool::new(
            |_ctx| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            shared.clone(),
        );

        pool.set_concurrency(3);
        tokio::time::sleep(Duration::from_secs(1)).await;
        pool.shutdown(Some(Duration::from_secs(2))).await;

        assert!(logs_contain("Graceful stop expired"));
        assert!(shared
            .aggregator
            .counter_value(ITERATIONS, &Labels::new())
            .is_err());
    }
}
