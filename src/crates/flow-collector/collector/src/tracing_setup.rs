//! Logging setup for the collector.
//!
//! Events go to stderr so stdout stays free for JSON-lines flow output.
//! `RUST_LOG` takes precedence over the configured filter.

use tracing_subscriber::{EnvFilter, prelude::*};

pub(crate) fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("tracing initialized, logging to stderr with filter '{}'", default_filter);
}
