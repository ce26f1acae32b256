//! Process-wide `tracing` subscriber.

use tracing_subscriber::EnvFilter;

/// Filter used when `SDD_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn";

/// Installs the stderr subscriber. Returns `false` if one was already set.
pub fn init(filter: &str) -> bool {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
