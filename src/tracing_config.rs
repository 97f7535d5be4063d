//! Tracing subscriber setup for the server binary
//!
//! The library only emits events; the binary decides where they go. `log`
//! records from dependencies are forwarded into the same subscriber.

use crate::error::{IdPhotoError, Result};
use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Output format of the log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Colored, human readable (default)
    #[default]
    Console,
    /// No colors, for CI logs and containers
    Compact,
    /// One JSON object per line, needs the `tracing-json` feature
    Json,
}

impl FromStr for TracingFormat {
    type Err = IdPhotoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" | "pretty" => Ok(Self::Console),
            "compact" | "plain" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(IdPhotoError::invalid_config(format!(
                "unknown log format '{other}' (expected console, compact or json)"
            ))),
        }
    }
}

impl std::fmt::Display for TracingFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Console => "console",
            Self::Compact => "compact",
            Self::Json => "json",
        })
    }
}

/// Tracing configuration builder
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// `-v` count
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Filter directives, overriding `verbosity` (usually from `RUST_LOG`)
    pub env_filter: Option<String>,
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Take the filter from `RUST_LOG` when it is set and non-empty
    #[must_use]
    pub fn with_env_filter_from_env(self) -> Self {
        match std::env::var(EnvFilter::DEFAULT_ENV) {
            Ok(filter) if !filter.trim().is_empty() => self.with_env_filter(filter),
            _ => self,
        }
    }

    /// Filter directives for the verbosity level
    ///
    /// Dependencies stay at `info` until `-vv`, otherwise hyper and the
    /// inference runtime drown out the request log.
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "info,iphoto_id=debug",
            _ => "trace",
        }
    }

    /// The directives that will be used
    #[must_use]
    pub fn filter_directives(&self) -> String {
        self.env_filter
            .clone()
            .unwrap_or_else(|| self.verbosity_to_filter().to_string())
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directives
    /// - JSON requested without the `tracing-json` feature
    /// - A global subscriber is already installed
    pub fn init(self) -> Result<()> {
        use tracing_subscriber::fmt;

        let filter = EnvFilter::try_new(self.filter_directives()).map_err(|e| {
            IdPhotoError::invalid_config(format!("Invalid log filter '{}': {e}", self.filter_directives()))
        })?;
        let registry = Registry::default().with(filter);

        let installed = match self.format {
            TracingFormat::Console => registry
                .with(
                    fmt::layer()
                        .with_ansi(true)
                        .with_target(false)
                        .with_level(true)
                        .compact(),
                )
                .try_init(),
            TracingFormat::Compact => registry
                .with(fmt::layer().with_ansi(false).with_target(false).compact())
                .try_init(),
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => registry
                .with(fmt::layer().json().with_current_span(true).with_span_list(true))
                .try_init(),
            #[cfg(not(feature = "tracing-json"))]
            TracingFormat::Json => {
                return Err(IdPhotoError::invalid_config(
                    "JSON logs need the 'tracing-json' feature",
                ))
            },
        };

        installed.map_err(|e| IdPhotoError::internal(format!("Failed to install tracing subscriber: {e}")))
    }
}
