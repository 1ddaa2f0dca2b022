//! Logging setup for binaries, tests, and benches.
//!
//! The engine itself only emits `tracing` events; installing a
//! subscriber is left to the embedding application. The helpers here
//! cover the common case: an env-filtered, human-readable layer on
//! stderr. stdout stays free for decoded output.

use std::io::IsTerminal;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default directive when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "rd_core=info";

/// Install the stderr subscriber with the default filter.
///
/// Safe to call more than once; only the first call installs anything,
/// so test binaries can call it from every test.
pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}

/// Install the stderr subscriber with an explicit fallback filter,
/// still overridable through `RUST_LOG`.
pub fn init_with_filter(fallback: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let use_ansi = std::io::stderr().is_terminal();
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(use_ansi);

    // Errors only when a subscriber is already installed.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
