//! Tracing subscriber setup.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "IMGDUP_LOG";

/// Install the global subscriber. Logs go to stderr so stdout stays clean for
/// `--json` output.
///
/// `IMGDUP_LOG` wins when set; otherwise `--verbose` selects debug and
/// `--quiet` warnings only.
pub fn init(verbose: bool, quiet: bool) {
    let default_level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .with(filter)
        .try_init();
}
