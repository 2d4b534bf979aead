//! Tracing subscriber initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::models::LoggingConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `verbose` forces `debug` and the
/// configured level applies.
pub fn init_logger(config: &LoggingConfig, verbose: bool) {
    let default_level = if verbose {
        "debug"
    } else {
        config.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(verbose)
        .with_line_number(verbose)
        .compact()
        .with_ansi(config.ansi)
        .with_writer(std::io::stderr);

    // A second init (tests, embedding in another binary) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
