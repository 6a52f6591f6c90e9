// src/telemetry.rs
//! Process-wide log output.
//!
//! The library only emits `tracing` events and spans; this installs a plain
//! fmt subscriber for hosts and tests that don't bring their own.

use tracing::Level;

/// Install a fmt subscriber filtered at `level`. Returns `false` if a global
/// subscriber was already set (by an earlier call or by the host).
pub fn init_logging(level: Level) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}

/// Debug builds log at `DEBUG`, release builds at `WARN`.
pub fn default_level() -> Level {
    if cfg!(debug_assertions) {
        Level::DEBUG
    } else {
        Level::WARN
    }
}
