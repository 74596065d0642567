//! Diagnostic tracing setup.
//!
//! Diagnostics go to stderr and are controlled by `RUST_LOG` (default
//! `warn`). Product output (assistant text, `[TOOL]`/`[RESULT]` echoes,
//! session listings) goes to stdout and never passes through here.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output: stderr, compact format.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
