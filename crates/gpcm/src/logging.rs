//! Process-wide log output.

use tracing_subscriber::EnvFilter;

use crate::GpcmError;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (for example `"gpcm=info"`) when it is unset.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(default_directive: &str) -> Result<(), GpcmError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| GpcmError::Logging(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| GpcmError::Logging(e.to_string()))
}
