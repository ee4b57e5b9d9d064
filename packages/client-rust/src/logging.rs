//! Global `tracing` subscriber setup.

use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Renders the filter directives for `config`: the base level, then
/// `target=debug` per include and `target=off` per exclude.
#[must_use]
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = vec![config.level.clone()];
    directives.extend(config.include.iter().map(|target| format!("{target}=debug")));
    directives.extend(config.exclude.iter().map(|target| format!("{target}=off")));
    directives.join(",")
}

/// Builds an `EnvFilter` from `config`.
///
/// # Errors
///
/// Returns a [`ParseError`] if the level or a target is not a valid directive.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, ParseError> {
    EnvFilter::try_new(filter_directives(config))
}

/// Installs the global subscriber.
///
/// Returns `Ok(false)` if a global subscriber was already installed.
///
/// # Errors
///
/// Returns a [`ParseError`] for an invalid filter configuration.
pub fn init_logging(config: &LoggingConfig) -> Result<bool, ParseError> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    Ok(installed.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_combine_level_include_and_exclude() {
        let config = LoggingConfig {
            level: "warn".into(),
            include: vec!["pivot_client::load".into()],
            exclude: vec!["pivot_core::grid".into()],
            json: false,
        };
        assert_eq!(
            filter_directives(&config),
            "warn,pivot_client::load=debug,pivot_core::grid=off"
        );
        assert!(env_filter(&config).is_ok());
    }

    #[test]
    fn invalid_level_is_rejected() {
        let config = LoggingConfig {
            level: "pivot_client=loudest".into(),
            ..LoggingConfig::default()
        };
        assert!(env_filter(&config).is_err());
    }

    #[test]
    fn second_init_reports_existing_subscriber() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config).unwrap();
        assert!(!init_logging(&config).unwrap());
    }
}
