use clap::{Parser, ValueEnum};
use rampart::core::{RunConfig, RunReport, EXIT_INVALID_CONFIG};
use rampart::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::FmtSubscriber;

mod profiles;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Profile {
    ApiLoad,
    Soak,
    Spike,
    Stress,
}

impl Profile {
    fn name(self) -> &'static str {
        match self {
            Profile::ApiLoad => "api-load",
            Profile::Soak => "soak",
            Profile::Spike => "spike",
            Profile::Stress => "stress",
        }
    }

    fn config(self) -> &'static str {
        match self {
            Profile::ApiLoad => include_str!("../config/api-load.json"),
            Profile::Soak => include_str!("../config/soak.json"),
            Profile::Spike => include_str!("../config/spike.json"),
            Profile::Stress => include_str!("../config/stress.json"),
        }
    }
}

#[derive(Parser, Debug)]
#[command(version = "0.1", about = "Staged load profiles against the product API")]
struct DemoCli {
    #[arg(short, long, value_enum, default_value_t = Profile::ApiLoad)]
    profile: Profile,

    /// JSON run configuration layered over the profile's defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base address of the target, overriding `BASE_URL` and the configuration.
    #[arg(short, long)]
    base_url: Option<String>,

    /// Write the JSON summary here as well as to stdout.
    #[arg(short, long)]
    summary: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rampart=info,demos=info".into()),
        )
        .init();

    let args = DemoCli::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("{err:#}");
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };

    match run_profile(args.profile, config).await {
        Ok(report) => {
            if let Err(err) = write_summary(&report, args.summary.as_ref()) {
                tracing::error!("Unable to write summary: {err:#}");
            }
            ExitCode::from(report.exit_code())
        }
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn load_config(args: &DemoCli) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::from_json(args.profile.config())?;
    if let Some(path) = &args.config {
        config = config.merge(RunConfig::from_path(path)?);
    }
    Ok(config
        .with_env_overrides()
        .with_base_address_override(args.base_url.clone()))
}

async fn run_profile(profile: Profile, config: RunConfig) -> Result<RunReport, RunError> {
    let name = profile.name();
    match profile {
        Profile::ApiLoad => launch(profiles::api_load(), name, config).await,
        Profile::Soak => launch(profiles::soak(), name, config).await,
        Profile::Spike => launch(profiles::spike(), name, config).await,
        Profile::Stress => launch(profiles::stress(), name, config).await,
    }
}

async fn launch(
    run: impl ConfigurableRun,
    profile: &'static str,
    config: RunConfig,
) -> Result<RunReport, RunError> {
    let run = run
        .config(config)
        .setup(move |ctx| profiles::announce(ctx, profile))
        .teardown(profiles::summarize);

    let abort = run.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; stopping the run");
            abort.abort();
        }
    });

    run.await
}

fn write_summary(report: &RunReport, path: Option<&PathBuf>) -> anyhow::Result<()> {
    let json = report.to_json()?;
    println!("{json}");
    if let Some(path) = path {
        std::fs::write(path, json)?;
    }
    Ok(())
}
