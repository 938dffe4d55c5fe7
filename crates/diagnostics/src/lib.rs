// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Logging facade shared by the proctree crates
//!
//! Output is controlled by the `PROCTREE_LOG` environment variable:
//! - `off` (default) - nothing is emitted
//! - `error`, `warn`, `info` - the usual thresholds
//! - `debug` - lock protocol decisions, commits and per-request traces
//!
//! Everything goes to stderr through `emit_term`, so a mounted filesystem
//! never writes into the stdout of its host process.

use std::sync::Once;

// Re-export emit so macros can use it
pub use emit;

/// Name of the environment variable consulted by [`init_diagnostics`].
pub const LOG_ENV: &str = "PROCTREE_LOG";

static INIT: Once = Once::new();

/// Parse a `PROCTREE_LOG` value. `None` means logging stays disabled.
///
/// Unknown values fall back to `info` so that a typo still produces output.
pub fn parse_level(value: &str) -> Option<emit::Level> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "off" | "none" => None,
        "error" => Some(emit::Level::Error),
        "warn" | "warning" => Some(emit::Level::Warn),
        "debug" | "trace" => Some(emit::Level::Debug),
        _ => Some(emit::Level::Info),
    }
}

/// Initialize diagnostics from `PROCTREE_LOG`.
///
/// Call once at startup; later calls are ignored.
pub fn init_diagnostics() {
    INIT.call_once(|| {
        let raw = std::env::var(LOG_ENV).unwrap_or_default();
        let Some(level) = parse_level(&raw) else {
            return;
        };

        let rt = emit::setup()
            .emit_to(emit_term::stderr())
            .emit_when(emit::level::min_filter(level))
            .init();

        // The runtime lives for the rest of the process.
        std::mem::forget(rt);
    });
}

/// Log normal operations: registrations, mounts, teardown.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

/// Log internal detail: lock protocol decisions, commits, request traces.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

/// Log recoverable problems: rejected commits, retried joins.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

/// Log failures that stop an operation outright.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::emit::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::emit::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::emit::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::emit::error!($($arg)*)
    };
}

pub use init_diagnostics as init;
