//! # Logging
//!
//! The core never owns a logging policy; it emits `tracing` events and
//! leaves subscription to the host application. This module ships a
//! reference initializer for standalone use and for this repository's own
//! tests — the shape a consuming binary's own `main()` would normally
//! provide.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber reading its filter from
/// `RUST_LOG`, falling back to `level` when the variable is unset or
/// unparsable. Safe to call more than once; later calls are no-ops.
///
/// Not called by any library code path — only by tests and standalone
/// consumers of this crate that have no logging setup of their own.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
