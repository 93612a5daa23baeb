//! Tracing subscriber setup.

use shared::config::{Config, LogFormat};
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt};

/// Initializes the tracing subscriber from the logging section. `RUST_LOG`
/// takes precedence over the configured level. Logs go to stderr so command
/// output stays clean.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let installed = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_tracing_returns_configured_level() {
        let mut config = Config::with_defaults();
        config.logging.level = "debug".to_string();
        assert_eq!(initialize_tracing(&config), "debug");
    }
}
