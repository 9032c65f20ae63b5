//! Logging setup helpers.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize env_logger once for the process.
///
/// Respects `RUST_LOG`; defaults to `info`. Safe to call from every test.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or("info"),
        )
        .is_test(cfg!(test))
        .try_init();
    });
}
