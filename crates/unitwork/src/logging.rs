//! Logging bootstrap.
//!
//! Every crate in the workspace logs through `tracing`; nothing is printed
//! until a subscriber is installed. These helpers install a `fmt`
//! subscriber filtered by an [`EnvFilter`]. Only the first successful call
//! in a process takes effect.

use tracing_subscriber::EnvFilter;

fn install(filter: EnvFilter) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}

/// Install a subscriber for `level` (a level name or any `EnvFilter`
/// directive, e.g. `"unitwork_session=trace,info"`).
///
/// An unparsable directive falls back to `debug`. Returns `false` if a
/// global subscriber was already installed.
pub fn init(level: &str) -> bool {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("debug"));
    install(filter)
}

/// Install a subscriber configured by `RUST_LOG`, defaulting to `info`.
pub fn init_from_env() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    install(filter)
}
