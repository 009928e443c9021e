//! Diagnostic tracing, written to stderr and filtered by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` applies
/// (for example `stagehand=info,tower_http=info`).
///
/// ```bash
/// RUST_LOG=stagehand=debug stagehand-server --port 8080
/// ```
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
