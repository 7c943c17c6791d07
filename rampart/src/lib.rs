#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod aggregator;
pub mod check;
pub mod context;
pub mod executor;
pub mod http;
pub mod run;
pub mod threshold;
#[doc(hidden)]
pub mod transaction;

pub(crate) mod scheduler;

pub use rampart_core as core;
pub use rampart_macros::{scenario, transaction};
pub use run::{AbortHandle, ConfigurableRun, Run, RunError};

pub mod prelude {
    pub use crate::context::VuContext;
    pub use crate::http::Response;
    pub use crate::run::{AbortHandle, ConfigurableRun, RunError};
    pub use rampart_core::{RunConfig, RunReport, Stage, ThresholdConfig};
    pub use rampart_macros::{scenario, transaction};
}
