//! Logging infrastructure - structured tracing throughout the engine
//!
//! Design: `tracing` with env-driven configuration, zero-cost when
//! disabled. Executor-side messages forwarded over the transport's log lane
//! arrive under the `callbridge::remote` target.

use crate::config::SessionConfig;
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Global init guard; the file appender worker lives here for the process
/// lifetime.
static LOGGER: OnceCell<Option<tracing_appender::non_blocking::WorkerGuard>> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter directive, `tracing_subscriber::EnvFilter` syntax
    pub filter: String,
    /// Write output to a file instead of stderr
    pub file_output: bool,
    /// Log file path when file output is enabled
    pub log_path: Option<String>,
    /// JSON format instead of human-readable
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "callbridge=info".into(),
            file_output: false,
            log_path: None,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Read configuration from the environment:
    /// `CALLBRIDGE_LOG_LEVEL`, `CALLBRIDGE_LOG_FILE`, `CALLBRIDGE_LOG_JSON`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(level) = std::env::var("CALLBRIDGE_LOG_LEVEL") {
            config.filter = format!("callbridge={}", level.to_lowercase());
        }
        if let Ok(path) = std::env::var("CALLBRIDGE_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }
        config.json_format = std::env::var("CALLBRIDGE_LOG_JSON").is_ok();
        config
    }

    /// Map a session's numeric log level onto a filter; the environment
    /// still overrides file and format choices.
    pub fn from_session(session: &SessionConfig) -> Self {
        let mut config = Self::from_env();
        config.filter = match session.log_level {
            0 => "callbridge=error".into(),
            1 => "callbridge=info".into(),
            2 => "callbridge=debug".into(),
            _ => "callbridge=trace".into(),
        };
        if session.log_write && config.log_path.is_none() {
            config.file_output = true;
            config.log_path = Some("callbridge.log".into());
        }
        config
    }
}

/// Initialize logging from the environment. Safe to call more than once;
/// only the first initialization takes effect.
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with an explicit configuration.
pub fn init_with_config(config: LogConfig) {
    LOGGER.get_or_init(|| {
        let filter = EnvFilter::try_new(config.filter.as_str())
            .unwrap_or_else(|_| EnvFilter::new("callbridge=info"));

        let (writer, guard) = if config.file_output {
            let path = config.log_path.as_deref().unwrap_or("callbridge.log");
            let appender = tracing_appender::rolling::never(".", path);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (non_blocking, Some(guard))
        } else {
            let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
            (non_blocking, Some(guard))
        };

        let registry = tracing_subscriber::registry().with(filter);
        let result = if config.json_format {
            registry
                .with(fmt::layer().json().with_writer(writer))
                .try_init()
        } else {
            registry.with(fmt::layer().with_writer(writer)).try_init()
        };
        // Another subscriber may already be installed (e.g. by a test
        // harness); logging stays on whatever was there first.
        if result.is_err() {
            return None;
        }
        guard
    });
}
