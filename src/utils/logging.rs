//! Per-module switchable logging.
//!
//! Modules on the hot ingestion path log every record at debug/info level.
//! Each of them declares an `ENABLE_LOGS` constant so that chatter can be
//! silenced locally without touching the global `RUST_LOG` filter:
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//!
//! use crate::{log_debug, log_info, log_warn, log_error};
//!
//! log_info!("connected to {}", addr);
//! ```

/// `log::debug!` gated by the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

/// `log::info!` gated by the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// `log::warn!` gated by the calling module's `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// `log::error!` gated by the calling module's `ENABLE_LOGS`.
///
/// Errors on the ingestion and outbox loops are never fatal, so this is the
/// only trace they leave; keep `ENABLE_LOGS` on in production builds.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
