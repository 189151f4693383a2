//! Console tracing for the orchestrator.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Leveled console output on stderr, coloured by
//!   severity. Filter via `RUST_LOG`.
//!
//! - **Run log (`io/run_log`)**: The durable, append-only audit file for a
//!   run. Every record is also forwarded to tracing so it shows up here.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber for console output.
///
/// Reads `RUST_LOG` if set. Otherwise defaults to `info`, or `debug` when
/// `verbose` is true.
///
/// # Example
/// ```bash
/// RUST_LOG=provision=debug provision run --plan plans/greenbone.toml
/// ```
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}
