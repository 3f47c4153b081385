//! Logging setup for programs that drive the engine.
//!
//! The library itself only emits `tracing` events; binaries and demos call
//! one of these helpers once at startup to print them.

use tracing::Level;

use crate::core::config::EngineConfig;
use crate::core::errors::{FlowError, Result};

/// Install a fmt subscriber at the given level.
///
/// Returns `Ok(false)` when a global subscriber was already installed, which
/// is the normal case in test binaries that initialise logging per test.
pub fn init(level: Level) -> Result<bool> {
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok();
    Ok(installed)
}

/// Install a fmt subscriber using `config.log_level`.
pub fn init_from_config(config: &EngineConfig) -> Result<bool> {
    let level = config
        .log_level
        .parse::<Level>()
        .map_err(|_| FlowError::configuration(format!("unknown log_level '{}'", config.log_level)))?;
    init(level)
}
