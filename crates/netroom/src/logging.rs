//! Tracing subscriber setup.
//!
//! Log lines carry structured fields (`room_id`, `client`, `entity`), so the
//! `fmt` layer is all a process needs. `RUST_LOG` wins over the filter
//! passed in.

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, or by `filter` when
/// the variable is unset or invalid.
///
/// Returns `false` if a global subscriber was already installed, which
/// makes it safe to call from every test.
pub fn init(filter: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Like [`init`], but writes through the test harness's captured output.
pub fn init_for_tests() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init()
        .is_ok()
}
