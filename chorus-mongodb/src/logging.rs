//! Logging setup for Chorus.
//!
//! Chorus logs through `tracing`. This module installs a subscriber driven
//! by environment variables when the `tracing-subscriber` feature is enabled.
//!
//! # Environment Variables
//!
//! - `CHORUS_DEBUG=true|1|yes` - Enable debug logging
//! - `CHORUS_LOG_LEVEL=debug|info|warn|error|trace` - Set specific log level
//! - `CHORUS_LOG_FORMAT=json|pretty|compact` - Set output format (default: json)
//!
//! ```rust,no_run
//! use chorus_mongodb::logging;
//!
//! logging::init();
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

/// Check if debug logging is enabled via `CHORUS_DEBUG`.
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var("CHORUS_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// The log level from `CHORUS_LOG_LEVEL`.
///
/// Defaults to "debug" when `CHORUS_DEBUG` is enabled, otherwise "warn".
pub fn get_log_level() -> &'static str {
    let fallback = if is_debug_enabled() { "debug" } else { "warn" };
    match env::var("CHORUS_LOG_LEVEL") {
        Ok(level) => match level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

/// The output format from `CHORUS_LOG_FORMAT`, defaulting to "json".
pub fn get_log_format() -> &'static str {
    env::var("CHORUS_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Initialize logging. Subsequent calls are no-ops.
///
/// Nothing is installed unless `CHORUS_DEBUG` or `CHORUS_LOG_LEVEL` is set.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var("CHORUS_LOG_LEVEL").is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = get_log_level();
            let filter = EnvFilter::try_new(format!(
                "chorus={},chorus_mongodb={},chorus_value={}",
                level, level, level
            ))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

            let registry = tracing_subscriber::registry().with(filter);
            let installed = match get_log_format() {
                "json" => registry.with(fmt::layer().json()).try_init(),
                "compact" => registry.with(fmt::layer().compact()).try_init(),
                _ => registry.with(fmt::layer().pretty()).try_init(),
            };

            if installed.is_ok() {
                tracing::info!(
                    level = level,
                    format = get_log_format(),
                    "Chorus logging initialized"
                );
            }
        }
    });
}
