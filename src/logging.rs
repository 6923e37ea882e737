//! Structured logging setup.
//!
//! `RUST_LOG` takes precedence; otherwise the configured `log_level` is used
//! for this crate and noisy dependencies are held at `warn`. `LOG_FORMAT`
//! selects `json` (one object per line) or `pretty` (default). Logs always go
//! to stderr so CLI output on stdout stays machine-readable.

use anyhow::Result;
use std::env;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match env::var("LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Level used when `RUST_LOG` is unset.
    pub default_level: String,
}

impl LoggingConfig {
    pub fn new(default_level: &str) -> Self {
        Self {
            format: LogFormat::from_env(),
            default_level: default_level.to_string(),
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{},sqlx=warn,hyper=warn,reqwest=warn,tower_http=info",
                self.default_level
            ))
        })
    }
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = config.filter();

    let layer = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(filter)
            .boxed(),
    };

    if tracing_subscriber::registry().with(layer).try_init().is_err() {
        tracing::debug!("logging already initialized");
    }
    Ok(())
}
