use crate::metric::MetricKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors detected while turning configuration into a runnable plan.
///
/// Every variant is fatal: the run aborts before any virtual user is started.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Run configuration declares no stages")]
    NoStages,

    #[error("Control tick must be greater than zero")]
    ZeroTick,

    #[error("{what} exceeds the maximum of {}", humantime::format_duration(*.limit))]
    DurationOverflow { what: &'static str, limit: Duration },

    #[error("Invalid metric selector `{0}`")]
    InvalidSelector(String),

    #[error("Invalid threshold `{expression}`: {reason}")]
    InvalidThreshold { expression: String, reason: String },

    #[error("Threshold `{expression}` cannot be applied to {kind} metric `{metric}`")]
    ThresholdKindMismatch {
        metric: String,
        expression: String,
        kind: MetricKind,
    },

    #[error("Invalid base address `{address}`: {source}")]
    InvalidBaseAddress {
        address: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Unable to read configuration file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
