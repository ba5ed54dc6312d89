//! Logging setup
//!
//! The bridge logs through the `log` facade. Binaries install `env_logger`
//! with a default filter built from [`LoggingConfig`]; `RUST_LOG` still
//! takes precedence when set.
//!
//! ```no_run
//! use xwl_bridge::config::LoggingConfig;
//!
//! xwl_bridge::logging::init(&LoggingConfig::default(), false).unwrap();
//! ```

use crate::config::LoggingConfig;
use anyhow::{Context, Result};

/// Default filter directive: the level, then the per-module filters
///
/// `debug` forces the base level to `debug` unless it is already more
/// verbose.
pub fn filter_spec(config: &LoggingConfig, debug: bool) -> String {
    let level = if debug && config.level != "trace" {
        "debug"
    } else {
        config.level.as_str()
    };
    std::iter::once(level)
        .chain(config.filters.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global logger
pub fn init(config: &LoggingConfig, debug: bool) -> Result<()> {
    let spec = filter_spec(config, debug);
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(spec.as_str()))
        .format_timestamp_millis()
        .try_init()
        .with_context(|| format!("Failed to install logger with filter '{}'", spec))
}
