//! Conditional logging macros gated on a module-level `ENABLE_LOGS` flag.
//!
//! Each module that uses them defines its own switch and imports the macros
//! from the crate root:
//! ```rust
//! const ENABLE_LOGS: bool = true;
//!
//! use dutywatch::{log_info, log_warn, log_error};
//!
//! log_info!("logged only while ENABLE_LOGS is true");
//! ```

/// Conditional info logging; checks `ENABLE_LOGS` in the calling module.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Conditional warn logging; checks `ENABLE_LOGS` in the calling module.
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

/// Conditional error logging; checks `ENABLE_LOGS` in the calling module.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}
