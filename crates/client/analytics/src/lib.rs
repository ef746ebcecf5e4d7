//! Logging for the `migrate` binary.
//!
//! Installs a `tracing` subscriber writing human-readable lines to stderr, so stdout stays free for command output.
//! The filter defaults to `INFO` and is overridden by `RUST_LOG` or [`AnalyticsConfig::log_filter`].

use formatter::CustomFormatter;
use tracing_core::LevelFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

mod formatter;

pub use formatter::LEDGER_STEPS_TARGET;

#[derive(Debug, Clone, Default)]
pub struct AnalyticsConfig {
    /// Filter directives, e.g. `sc_ledger=debug`. Takes precedence over `RUST_LOG`.
    pub log_filter: Option<String>,
}

pub struct AnalyticsService {
    config: AnalyticsConfig,
}

impl AnalyticsService {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self { config }
    }

    fn env_filter(&self) -> anyhow::Result<EnvFilter> {
        let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
        Ok(match &self.config.log_filter {
            Some(directives) => builder.parse(directives)?,
            None => builder.from_env()?,
        })
    }

    pub fn setup(&self) -> anyhow::Result<()> {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().event_format(CustomFormatter::new()?).with_writer(std::io::stderr))
            .with(self.env_filter()?)
            .try_init()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_filter_is_parsed() {
        let service = AnalyticsService::new(AnalyticsConfig { log_filter: Some("sc_ledger=debug,warn".into()) });
        let filter = service.env_filter().unwrap();
        assert!(filter.to_string().contains("sc_ledger=debug"));
    }

    #[test]
    fn test_invalid_filter_is_an_error() {
        let service = AnalyticsService::new(AnalyticsConfig { log_filter: Some("sc_ledger=loud".into()) });
        assert!(service.env_filter().is_err());
    }
}
