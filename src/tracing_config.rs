//! Tracing subscriber setup for the command-line tool
//!
//! The library only emits `tracing` and `log` events; installing a subscriber
//! is left to the binary.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Output style of the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Colored, human-oriented output
    #[default]
    Console,
    /// Plain output without ANSI codes, for CI logs and redirection
    Compact,
}

#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// 0 = info, 1 = debug, 2+ = trace
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Filter directive that takes precedence over `verbosity`
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

    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Install the global subscriber
    pub fn init(self) -> anyhow::Result<()> {
        let filter = match &self.env_filter {
            Some(directive) => EnvFilter::try_new(directive)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };
        let registry = Registry::default().with(filter);

        let layer = fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact();
        match self.format {
            TracingFormat::Console => registry.with(layer.with_ansi(true)).try_init()?,
            TracingFormat::Compact => registry.with(layer.with_ansi(false)).try_init()?,
        }

        tracing::debug!(verbosity = self.verbosity, format = ?self.format, "Tracing initialized");
        Ok(())
    }
}

/// Subscriber for the CLI: `RUST_LOG` wins over the `-v` count
pub fn init_cli_tracing(verbosity: u8, compact: bool) -> anyhow::Result<()> {
    let mut config = TracingConfig::new().with_verbosity(verbosity).with_format(if compact {
        TracingFormat::Compact
    } else {
        TracingFormat::Console
    });
    if let Ok(directive) = std::env::var("RUST_LOG") {
        config = config.with_env_filter(directive);
    }
    config.init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        let filters: Vec<&str> = (0..4)
            .map(|v| TracingConfig::new().with_verbosity(v).verbosity_to_filter())
            .collect();
        assert_eq!(filters, vec!["info", "debug", "trace", "trace"]);
    }

    #[test]
    fn test_builder() {
        let config = TracingConfig::new()
            .with_format(TracingFormat::Compact)
            .with_env_filter("idphoto_composer=debug");
        assert_eq!(config.format, TracingFormat::Compact);
        assert_eq!(config.env_filter.as_deref(), Some("idphoto_composer=debug"));
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let err = TracingConfig::new().with_env_filter("idphoto=loud").init();
        assert!(err.is_err());
    }
}
