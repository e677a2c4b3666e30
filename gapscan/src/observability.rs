//! Tracing setup for binaries and tests.
//!
//! The engine itself only emits `tracing` events; installing a subscriber is
//! left to the embedding process, with this helper covering the common case.

use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, falling back to
/// `default_filter`. Safe to call more than once; later calls are no-ops, so
/// tests can each request initialization.
pub fn init_tracing(default_filter: &str, json_output: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = if json_output {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
