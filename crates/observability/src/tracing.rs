//! JSON log output filtered by `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Used when `RUST_LOG` is unset or does not parse.
pub const DEFAULT_DIRECTIVE: &str = "info,sqlx=warn";

/// Returns `false` when a global subscriber was already installed.
pub fn init(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_current_span(true)
        .with_target(false)
        .try_init()
        .is_ok()
}
