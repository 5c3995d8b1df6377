//! Structured logging setup.
//!
//! `RUST_LOG` wins when set; otherwise `[logging].level` applies to this
//! crate and `warn` to everything else. Logs go to stderr so command output
//! on stdout stays clean.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

pub fn filter_directive(config: &LoggingConfig) -> String {
    format!("warn,knowledge_harness={},kh={}", config.level, config.level)
}

pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let fmt_layer = match config.format.as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_scopes_level_to_this_crate() {
        let config = LoggingConfig {
            level: "debug".into(),
            format: "text".into(),
        };
        let directive = filter_directive(&config);
        assert_eq!(directive, "warn,knowledge_harness=debug,kh=debug");
        assert!(directive.parse::<EnvFilter>().is_ok());
    }
}
