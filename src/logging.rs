/// Structured logging setup using tracing
///
/// Writes to stderr only so stdout stays clean for command output (JSON results, stats).
/// Human-readable with ANSI colors when stderr is a terminal, JSON lines otherwise.

use std::io::IsTerminal;
use tracing_subscriber::{
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};
use crate::config::Config;

/// Build the filter directive for a base level raised by `-v` flags.
///
/// sqlx logs every statement at info, so it is held at warn unless tracing everything.
pub fn filter_directive(base_level: &str, verbosity: u8) -> String {
    match verbosity {
        0 => format!("{},sqlx=warn", base_level),
        1 => "info,vaultsearch=debug,sqlx=warn".to_string(),
        _ => "trace".to_string(),
    }
}

/// Initialize the stderr subscriber.
///
/// RUST_LOG, when set, wins over both config.log_level and `verbosity`.
pub fn init_logging(config: &Config, verbosity: u8) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(&config.log_level, verbosity)));

    let registry = tracing_subscriber::registry().with(env_filter);
    if std::io::stderr().is_terminal() {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(verbosity > 0),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .json()
                    .with_current_span(false),
            )
            .init();
    }
}
