//! Satchel Logging
//!
//! Structured logging for the Satchel session crates, controlled by the
//! `SATCHEL_DEBUG` family of environment variables.
//!
//! # Features
//!
//! - **Environment-controlled**: `SATCHEL_DEBUG=1` enables debug logging
//! - **Structured logging**: key/value fields rendered inline or as a JSON object
//! - **Multiple backends**: stderr output, the `log` facade, optionally `tracing`
//!
//! # Usage
//!
//! ```rust
//! use satchel_log::{debug, info, warn, error, trace};
//!
//! debug!("Loading session");
//! info!("Store opened with {} records", 12);
//! warn!("Stored payload is malformed");
//! error!("Backend unreachable");
//!
//! let id = "3f2a";
//! info!(target: "satchel::session", fields: { "session_id" => id }, "Session destroyed");
//! debug!(fields: { "session_id" => id, "keys" => 4 }, "Session loaded");
//! ```
//!
//! # Environment Variables
//!
//! - `SATCHEL_DEBUG=1` - Enable debug logging
//! - `SATCHEL_LOG_LEVEL=debug|info|warn|error` - Set log level
//! - `SATCHEL_LOG_FORMAT=pretty|json|compact|facade` - Set output format
//! - `SATCHEL_LOG_COLOR=1|0` - Enable/disable colors

mod config;
mod level;
mod output;

pub use config::{
    LogConfig, config, current_level, enabled, init, is_debug_enabled, is_level_enabled,
    set_debug, set_level,
};
pub use level::{Format, Level};
pub use output::{Field, log, log_with_fields};

// ============================================================================
// Macros
// ============================================================================

#[doc(hidden)]
#[macro_export]
macro_rules! __log {
    ($level:expr, $target:expr, { $($k:literal => $v:expr),* }, $($arg:tt)+) => {
        if $crate::enabled($level) {
            $crate::log_with_fields(
                $level,
                $target,
                &format!($($arg)+),
                &[$(($k, &$v as &dyn ::std::fmt::Display)),*],
            );
        }
    };
}

/// Log a trace message.
///
/// Only enabled when `SATCHEL_LOG_LEVEL=trace`.
#[macro_export]
macro_rules! trace {
    (target: $target:expr, fields: { $($k:literal => $v:expr),* $(,)? }, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Trace, $target, { $($k => $v),* }, $($arg)+)
    };
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Trace, $target, {}, $($arg)+)
    };
    (fields: { $($k:literal => $v:expr),* $(,)? }, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Trace, module_path!(), { $($k => $v),* }, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Trace, module_path!(), {}, $($arg)+)
    };
}

/// Log a debug message.
///
/// Only enabled when `SATCHEL_DEBUG=1` or `SATCHEL_LOG_LEVEL=debug`.
///
/// # Example
///
/// ```rust
/// use satchel_log::debug;
///
/// let id = "3f2a";
/// debug!("Session {} loaded", id);
/// debug!(fields: { "session_id" => id }, "Session loaded");
/// ```
#[macro_export]
macro_rules! debug {
    (target: $target:expr, fields: { $($k:literal => $v:expr),* $(,)? }, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Debug, $target, { $($k => $v),* }, $($arg)+)
    };
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Debug, $target, {}, $($arg)+)
    };
    (fields: { $($k:literal => $v:expr),* $(,)? }, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Debug, module_path!(), { $($k => $v),* }, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Debug, module_path!(), {}, $($arg)+)
    };
}

/// Log an info message.
#[macro_export]
macro_rules! info {
    (target: $target:expr, fields: { $($k:literal => $v:expr),* $(,)? }, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Info, $target, { $($k => $v),* }, $($arg)+)
    };
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Info, $target, {}, $($arg)+)
    };
    (fields: { $($k:literal => $v:expr),* $(,)? }, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Info, module_path!(), { $($k => $v),* }, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Info, module_path!(), {}, $($arg)+)
    };
}

/// Log a warning message.
#[macro_export]
macro_rules! warn {
    (target: $target:expr, fields: { $($k:literal => $v:expr),* $(,)? }, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Warn, $target, { $($k => $v),* }, $($arg)+)
    };
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Warn, $target, {}, $($arg)+)
    };
    (fields: { $($k:literal => $v:expr),* $(,)? }, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Warn, module_path!(), { $($k => $v),* }, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Warn, module_path!(), {}, $($arg)+)
    };
}

/// Log an error message.
#[macro_export]
macro_rules! error {
    (target: $target:expr, fields: { $($k:literal => $v:expr),* $(,)? }, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Error, $target, { $($k => $v),* }, $($arg)+)
    };
    (target: $target:expr, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Error, $target, {}, $($arg)+)
    };
    (fields: { $($k:literal => $v:expr),* $(,)? }, $($arg:tt)+) => {
        $crate::__log!($crate::Level::Error, module_path!(), { $($k => $v),* }, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__log!($crate::Level::Error, module_path!(), {}, $($arg)+)
    };
}

// ============================================================================
// Tracing Integration
// ============================================================================

#[cfg(feature = "tracing")]
pub mod tracing_compat {
    //! Tracing compatibility layer.
    //!
    //! When the `tracing` feature is enabled, this module provides
    //! a subscriber that respects `SATCHEL_LOG_LEVEL`.

    use super::*;

    /// Create a tracing subscriber that respects Satchel config.
    pub fn subscriber() -> impl tracing::Subscriber {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{EnvFilter, fmt};

        let config = config();
        let level = config.level.as_str().to_lowercase();

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(config.color))
    }
}
