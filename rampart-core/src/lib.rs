mod config;
mod constants;
mod error;
mod labels;
mod metric;
mod plan;
mod stage;
mod stats;
mod threshold;

pub use config::*;
pub use constants::*;
pub use error::*;
pub use labels::*;
pub use metric::*;
pub use plan::*;
pub use stage::*;
pub use stats::*;
pub use threshold::*;
