//! Diagnostic logging to stderr.
//!
//! Stdout carries the single JSON result the node agent parses, so logs
//! never go there and stay off unless a filter enables them.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable that overrides the configured filter.
pub const LOG_ENV: &str = "FLEXVOL_LOG";

/// Installs the global subscriber.
///
/// `FLEXVOL_LOG` wins over `configured`; an unparsable directive disables
/// logging. Installing twice is a no-op.
pub fn init(configured: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new("off"));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(false),
        )
        .try_init();
    // A subscriber already set by an embedding process or an earlier call
    // stays in place.
    drop(installed);
}
