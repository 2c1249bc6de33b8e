//! Tracing setup for hdsched.
//!
//! Events go to stderr so that `--json` output on stdout stays parseable.
//! RUST_LOG always wins over the level chosen here.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter for a `-v` count: warn, then info, then debug
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Install the subscriber for a CLI run
pub fn init(verbosity: u8) {
    init_with_level(level_for_verbosity(verbosity))
}

/// Install the subscriber with an explicit default level
pub fn init_with_level(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Route scheduler events into the test harness output
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("dialysis_core=debug"))
        .try_init();
}
