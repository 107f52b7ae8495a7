//! # Observability
//!
//! Shared logging setup for rowcast binaries.
//!
//! Services call `observability::init_with_config()` once at startup and use
//! standard `tracing` macros everywhere else. Library code never installs a
//! subscriber; only binaries do.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "rowcast".into(),
//!         default_level: "debug".into(),
//!         json: true,
//!         ..Default::default()
//!     });
//!
//!     tracing::info!("ready");
//! }
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "rowcast").
    /// Emitted once at startup so log streams can be told apart.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Emit one JSON object per line instead of compact text.
    pub json: bool,

    /// Include the event target (module path) in each line.
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            json: false,
            with_target: true,
        }
    }
}

/// Initialize logging with default settings for the named service.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Logs go to stderr so stdout stays free for data. Calling this twice is
/// harmless: the second installation attempt is ignored.
pub fn init_with_config(config: LogConfig) {
    let filter = env_filter(&config.default_level);

    let fmt_layer = if config.json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(config.with_target)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .compact()
            .with_target(config.with_target)
            .with_writer(std::io::stderr)
            .boxed()
    };

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
    {
        tracing::info!(service = %config.service_name, "logging initialized");
    }
}

/// Build the level filter, preferring `RUST_LOG` when it parses.
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Re-export tracing macros for convenience.
/// Services can use `observability::info!()` or `tracing::info!()`.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(!config.json);
        assert!(config.with_target);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init("first");
        init_with_config(LogConfig {
            service_name: "second".into(),
            json: true,
            ..Default::default()
        });
    }
}
