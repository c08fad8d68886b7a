//! Logging initialization for the CLI.
//!
//! Logging is owned by the CLI crate; library crates only emit `tracing`
//! events.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber.
///
/// * `verbosity` - 0 = INFO, 1 = DEBUG, 2+ = TRACE
/// * `json` - stable JSON lines on stderr
/// * `quiet` - no console output at all (`RUST_LOG` still wins)
pub fn init(verbosity: u8, json: bool, quiet: bool) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if quiet => EnvFilter::new("off"),
        Err(_) => EnvFilter::new("warn")
            .add_directive(format!("wirepack_core={level}").parse().unwrap_or(level.into()))
            .add_directive(format!("wirepack_cli={level}").parse().unwrap_or(level.into())),
    };

    let subscriber = tracing_subscriber::registry().with(filter);
    let result = if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        subscriber
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    // Already initialized (tests)
    let _ = result;
}
