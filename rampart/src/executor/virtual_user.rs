use crate::context::{RunShared, VuContext};
use crate::transaction::TRANSACTION_HOOK;
use futures::FutureExt;
use rampart_core::{
    labels, Labels, CHECKS, ITERATIONS, ITERATIONS_FAILED, ITERATION_CHECK, ITERATION_DURATION,
    LABEL_CHECK,
};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

tokio::task_local! {
    static REQUEST_FAULT: Arc<AtomicBool>;
}

/// Mark the iteration running on this task as failed by a request that got no response.
/// Outside a virtual user (setup, teardown) this does nothing.
pub(crate) fn flag_request_failure() {
    let _ = REQUEST_FAULT.try_with(|fault| fault.store(true, Ordering::Release));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VuState {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

impl VuState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => VuState::Idle,
            1 => VuState::Running,
            _ => VuState::Stopped,
        }
    }
}

/// One concurrent worker repeatedly executing the scenario.
///
/// Stop requests are honoured only between iterations; an iteration in flight always runs to
/// completion unless the task is aborted outright.
pub(crate) struct VirtualUser {
    id: u64,
    state: Arc<AtomicU8>,
    stop: Arc<AtomicBool>,
    pub(super) handle: JoinHandle<()>,
}

impl VirtualUser {
    pub fn spawn<T, F>(
        id: u64,
        scenario: T,
        shared: Arc<RunShared>,
        run_stopped: Arc<AtomicBool>,
    ) -> Self
    where
        T: Fn(VuContext) -> F + Send + Sync + 'static,
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(VuState::Idle as u8));
        let stop = Arc::new(AtomicBool::new(false));

        let ctx = VuContext::new(id, shared.clone());
        let task = vu_loop(
            ctx,
            scenario,
            state.clone(),
            stop.clone(),
            run_stopped,
        );
        let handle = tokio::spawn(TRANSACTION_HOOK.scope(shared.aggregator.clone(), task));

        Self {
            id,
            state,
            stop,
            handle,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> VuState {
        VuState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Ask the VU to exit at its next iteration boundary.
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn abort(&self) {
        self.handle.abort();
        self.state.store(VuState::Stopped as u8, Ordering::Release);
    }
}

async fn vu_loop<T, F>(
    ctx: VuContext,
    scenario: T,
    state: Arc<AtomicU8>,
    stop: Arc<AtomicBool>,
    run_stopped: Arc<AtomicBool>,
) where
    T: Fn(VuContext) -> F + Send + Sync + 'static,
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let no_labels = Labels::new();
    let failed_check = labels! { LABEL_CHECK => ITERATION_CHECK };
    let fault = Arc::new(AtomicBool::new(false));
    let mut iteration = 0;

    while !stop.load(Ordering::Acquire) && !run_stopped.load(Ordering::Acquire) {
        state.store(VuState::Running as u8, Ordering::Release);

        let start = Instant::now();
        let res = REQUEST_FAULT
            .scope(
                fault.clone(),
                AssertUnwindSafe(scenario(ctx.for_iteration(iteration))).catch_unwind(),
            )
            .await;
        let elapsed = start.elapsed();
        let request_failed = fault.swap(false, Ordering::AcqRel);

        let metrics = ctx.metrics();
        metrics.record_counter(ITERATIONS, &no_labels, 1);
        metrics.record_trend(ITERATION_DURATION, &no_labels, elapsed.as_secs_f64() * 1_000.);

        let failure = match res {
            Ok(Ok(())) if request_failed => Some("a request got no response".to_string()),
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(format!("{err:#}")),
            Err(_) => Some("iteration panicked".to_string()),
        };
        if let Some(reason) = failure {
            debug!("VU {} iteration {iteration} failed: {reason}", ctx.vu());
            metrics.record_counter(ITERATIONS_FAILED, &no_labels, 1);
            metrics.record_rate(CHECKS, &failed_check, false);
        }

        state.store(VuState::Idle as u8, Ordering::Release);
        iteration += 1;

        // Iterations that never await would otherwise starve the scheduler.
        tokio::task::yield_now().await;
    }

    state.store(VuState::Stopped as u8, Ordering::Release);
    trace!("VU {} stopped after {iteration} iterations", ctx.vu());
}
