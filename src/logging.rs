//! Opt-in diagnostics for the host process.
//!
//! The library is loaded into foreign programs, so it stays silent unless
//! `RUSTEMBED_LOG` holds a filter directive such as `info` or
//! `rustembed=debug`.
use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "RUSTEMBED_LOG";

/// Whether the host asked for diagnostics on stderr.
#[must_use]
pub fn enabled() -> bool {
    std::env::var_os(LOG_ENV).is_some_and(|v| !v.is_empty())
}

/// Install a stderr subscriber once, if requested and none is installed yet.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) else {
            return;
        };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}
