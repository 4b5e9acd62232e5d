//! Command implementations for the pifleet binary

pub mod announce;
pub mod nodes;
pub mod run;
pub mod scan;

pub use announce::announce;
pub use nodes::nodes;
pub use run::{run, RunParams};
pub use scan::scan;

use anyhow::Result;
use std::path::Path;

use pifleet::config::Config;

/// Load configuration from a TOML file, or from the environment when no
/// file is given
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    tracing::debug!(method = %config.discovery.method, "Configuration loaded");
    Ok(config)
}

/// Initialize metrics, logging instead of failing
pub(crate) fn init_metrics() {
    if let Err(e) = pifleet::metrics::init_metrics() {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }
}
