use std::str::FromStr;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};
use crate::error::CacheError;

/// Install a global tracing subscriber using the provided logging settings.
///
/// The filter comes from `logging.level` only; the environment is not consulted.
pub fn init(logging: &LoggingSettings) -> Result<(), CacheError> {
    let level = parse_level(&logging.level)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy("");

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| CacheError::Config(format!("failed to install tracing subscriber: {err}")))
}

fn parse_level(level: &str) -> Result<LevelFilter, CacheError> {
    LevelFilter::from_str(level)
        .map_err(|err| CacheError::Config(format!("invalid logging.level '{level}': {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels() {
        assert_eq!(parse_level("debug").unwrap(), LevelFilter::DEBUG);
        assert_eq!(parse_level("WARN").unwrap(), LevelFilter::WARN);
        assert!(matches!(parse_level("loud"), Err(CacheError::Config(_))));
    }

    #[test]
    fn second_install_fails() {
        let logging = LoggingSettings::default();
        // Another test may already have installed a subscriber; either way the
        // second call in this test must fail.
        let _ = init(&logging);
        assert!(init(&logging).is_err());
    }
}
