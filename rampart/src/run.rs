//! Run logic and lifecycle
use crate::aggregator::Aggregator;
use crate::context::{RunShared, VuContext};
use crate::executor::VuPool;
use crate::http::HttpClient;
use crate::scheduler::{ScheduleOutcome, Scheduler};
use crate::threshold::{abort_check, evaluate};
use futures::future::BoxFuture;
use rampart_core::{
    ConfigError, RunConfig, RunPlan, RunReport, Stage, ThresholdConfig, EXIT_INVALID_CONFIG,
    EXIT_SETUP_FAILED,
};
use serde_json::Value;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

type SetupHook = Arc<dyn Fn(VuContext) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;
type TeardownHook = Arc<dyn Fn(VuContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Errors that prevent a run from producing a report.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Unable to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Setup failed: {0}")]
    Setup(String),
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Config(_) | RunError::Client(_) => EXIT_INVALID_CONFIG,
            RunError::Setup(_) => EXIT_SETUP_FAILED,
        }
    }
}

/// Stops a run from outside, e.g. on Ctrl-C.
///
/// The run stops scheduling, drains in-flight iterations, runs teardown and still reports.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[derive(Clone, Default)]
struct Hooks {
    setup: Option<SetupHook>,
    teardown: Option<TeardownHook>,
}

/// Load test run structure
///
/// Handler for running scenarios. Not intended for manual creation, use the
/// [`#[scenario]`](rampart_macros::scenario) macro which will add these methods to functions.
#[pin_project::pin_project]
pub struct Run<T> {
    func: T,
    runner_fut: Option<Pin<Box<dyn Future<Output = Result<RunReport, RunError>> + Send>>>,
    name: String,
    config: RunConfig,
    hooks: Hooks,
    abort: AbortHandle,
}

impl<T> Run<T> {
    #[doc(hidden)]
    pub fn new(name: &str, func: T) -> Self {
        Self {
            func,
            runner_fut: None,
            name: name.to_string(),
            config: RunConfig::default(),
            hooks: Hooks::default(),
            abort: AbortHandle::new(),
        }
    }
}

impl<T, F> Future for Run<T>
where
    T: Fn(VuContext) -> F + Send + Sync + 'static + Clone,
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    type Output = Result<RunReport, RunError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if this.runner_fut.is_none() {
            let func = this.func.clone();
            let name = this.name.clone();
            let config = this.config.clone();
            let hooks = this.hooks.clone();
            let abort = this.abort.clone();
            *this.runner_fut = Some(Box::pin(async move {
                run_plan(func, name, config, hooks, abort).await
            }));
        }

        if let Some(runner) = this.runner_fut {
            runner.as_mut().poll(cx)
        } else {
            unreachable!()
        }
    }
}

pub trait ConfigurableRun: Future<Output = Result<RunReport, RunError>> + Sized + Send {
    fn config(self, config: RunConfig) -> Self;
    fn stage(self, duration: Duration, target: usize) -> Self;
    fn stages(self, stages: Vec<Stage>) -> Self;
    fn threshold(self, metric: &str, threshold: impl Into<ThresholdConfig>) -> Self;
    fn base_address(self, address: &str) -> Self;
    fn graceful_stop(self, limit: Duration) -> Self;
    fn setup<S, SF>(self, hook: S) -> Self
    where
        S: Fn(VuContext) -> SF + Send + Sync + 'static,
        SF: Future<Output = anyhow::Result<Value>> + Send + 'static;
    fn teardown<D, DF>(self, hook: D) -> Self
    where
        D: Fn(VuContext) -> DF + Send + Sync + 'static,
        DF: Future<Output = anyhow::Result<()>> + Send + 'static;
    fn abort_handle(&self) -> AbortHandle;
}

impl<T, F> ConfigurableRun for Run<T>
where
    T: Fn(VuContext) -> F + Send + Sync + 'static + Clone,
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    /// Layer a full configuration (typically loaded from JSON) over what is already set.
    ///
    /// # Example
    /// ```no_run
    /// use rampart::prelude::*;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let config = RunConfig::from_path("load.json")?.with_env_overrides();
    ///     let report = my_scenario().config(config).await?;
    ///     println!("{}", report.to_json()?);
    ///     Ok(())
    /// }
    ///
    /// #[scenario]
    /// async fn my_scenario(ctx: VuContext) -> anyhow::Result<()> {
    ///     ctx.http().get("/health").await;
    ///     Ok(())
    /// }
    /// ```
    fn config(mut self, config: RunConfig) -> Self {
        self.config = std::mem::take(&mut self.config).merge(config);
        self
    }

    /// Append a stage ramping linearly to `target` VUs over `duration`.
    ///
    /// # Example
    /// ```no_run
    /// use rampart::prelude::*;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let report = my_scenario()
    ///         .stage(Duration::from_secs(120), 50)
    ///         .stage(Duration::from_secs(300), 50)
    ///         .stage(Duration::from_secs(60), 0)
    ///         .await;
    /// }
    ///
    /// #[scenario]
    /// async fn my_scenario(ctx: VuContext) -> anyhow::Result<()> {
    ///     Ok(())
    /// }
    /// ```
    fn stage(mut self, duration: Duration, target: usize) -> Self {
        self.config.stages.push(Stage::new(duration, target));
        self
    }

    /// Replace the stage list.
    fn stages(mut self, stages: Vec<Stage>) -> Self {
        self.config.stages = stages;
        self
    }

    /// Add a threshold on `metric`, which may carry a label filter.
    ///
    /// # Example
    /// ```no_run
    /// use rampart::prelude::*;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let report = my_scenario()
    ///         .stage(Duration::from_secs(60), 10)
    ///         .threshold("http_req_duration", "p(95)<500")
    ///         .threshold("http_req_duration{route:/health}", "p(99)<50")
    ///         .threshold("http_req_failed", "rate<0.05")
    ///         .await;
    /// }
    ///
    /// #[scenario]
    /// async fn my_scenario(ctx: VuContext) -> anyhow::Result<()> {
    ///     Ok(())
    /// }
    /// ```
    fn threshold(mut self, metric: &str, threshold: impl Into<ThresholdConfig>) -> Self {
        self.config
            .thresholds
            .entry(metric.to_string())
            .or_default()
            .push(threshold.into());
        self
    }

    fn base_address(mut self, address: &str) -> Self {
        self.config.base_address = Some(address.to_string());
        self
    }

    /// Bound the final drain; VUs still busy afterwards are interrupted.
    fn graceful_stop(mut self, limit: Duration) -> Self {
        self.config.graceful_stop = Some(limit);
        self
    }

    /// Run `hook` once before any VU starts. Its value is available to every iteration through
    /// [`VuContext::setup_data`]. A failing setup aborts the run before load starts.
    fn setup<S, SF>(mut self, hook: S) -> Self
    where
        S: Fn(VuContext) -> SF + Send + Sync + 'static,
        SF: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.hooks.setup = Some(Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    /// Run `hook` once after every VU stopped, including after an abort.
    fn teardown<D, DF>(mut self, hook: D) -> Self
    where
        D: Fn(VuContext) -> DF + Send + Sync + 'static,
        DF: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.hooks.teardown = Some(Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
}

#[instrument(name = "run", skip_all, fields(name = %name))]
async fn run_plan<T, F>(
    scenario: T,
    name: String,
    config: RunConfig,
    hooks: Hooks,
    abort: AbortHandle,
) -> Result<RunReport, RunError>
where
    T: Fn(VuContext) -> F + Send + Sync + 'static + Clone,
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let plan = RunPlan::from_config(&name, &config)?;
    info!(
        "Running {} with {} stages over {} against {}",
        plan.name,
        plan.schedule.stages().len(),
        humantime::format_duration(plan.schedule.total_duration()),
        plan.base_url
    );

    let aggregator = Arc::new(Aggregator::new(plan.percentile));
    let http = HttpClient::new(
        plan.base_url.clone(),
        aggregator.clone(),
        plan.request_timeout,
        plan.rps,
    )?;
    let mut shared = RunShared {
        http,
        aggregator,
        env: plan.env.clone(),
        setup_data: Arc::new(Value::Null),
    };

    if let Some(setup) = &hooks.setup {
        let ctx = VuContext::new(0, Arc::new(shared.clone()));
        let data = setup(ctx)
            .await
            .map_err(|err| RunError::Setup(format!("{err:#}")))?;
        debug!("Setup complete");
        shared.setup_data = Arc::new(data);
    }
    let shared = Arc::new(shared);

    let start = Instant::now();
    let mut pool = VuPool::new(scenario, shared.clone());
    let scheduler = Scheduler::new(plan.schedule.clone(), plan.tick);
    let mut abort_rx = abort.subscribe();

    let outcome = scheduler
        .run(&mut pool, &mut abort_rx, |elapsed| {
            abort_check(plan.abort_thresholds(), &shared.aggregator, elapsed)
        })
        .await;

    pool.shutdown(plan.graceful_stop).await;
    let elapsed = start.elapsed();

    if let Some(teardown) = &hooks.teardown {
        if let Err(err) = teardown(VuContext::new(0, shared.clone())).await {
            warn!("Teardown failed: {err:#}");
        }
    }

    let verdict = evaluate(&plan.thresholds, &shared.aggregator);
    for outcome in &verdict.thresholds {
        if outcome.passed() {
            info!("{outcome}");
        } else {
            warn!("{outcome}");
        }
    }

    let aborted = match outcome {
        ScheduleOutcome::Completed => None,
        ScheduleOutcome::Aborted(reason) => Some(reason),
    };

    let report = RunReport {
        name,
        elapsed,
        aborted,
        verdict,
        metrics: shared.aggregator.summarize(elapsed),
    };

    info!(
        "Run {} after {}",
        if report.passed() { "passed" } else { "failed" },
        humantime::format_duration(elapsed)
    );

    Ok(report)
}
