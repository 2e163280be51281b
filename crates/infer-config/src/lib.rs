#![allow(clippy::must_use_candidate)]

mod env;
pub mod inference;
mod loader;
pub mod logging;

use serde::Deserialize;

pub use inference::*;
pub use logging::*;

/// Top-level configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Inference provider configuration
    #[serde(default)]
    pub inference: InferenceConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}
