//! Logging setup using tracing_subscriber.

use std::io::IsTerminal;
use std::sync::Once;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

static HARVESTER_LOG_ENV_VAR: &str = "HARVESTER_LOG";

/// Initializes the global subscriber, logging to stderr.
///
/// `RUST_LOG` directives win; otherwise this crate logs at `HARVESTER_LOG`,
/// falling back to `default_level`. Safe to call more than once.
pub fn init(default_level: LevelFilter) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let (env_filter, level) = env_filter_and_log_level(default_level);

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .init();

        tracing::debug!("log level: {}", level);
    });
}

fn env_filter_and_log_level(default_level: LevelFilter) -> (EnvFilter, String) {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let level = std::env::var(HARVESTER_LOG_ENV_VAR)
        .ok()
        .filter(|l| l.parse::<LevelFilter>().is_ok())
        .unwrap_or_else(|| default_level.to_string().to_lowercase());

    let mut filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse_lossy(&directives);

    let crate_name = env!("CARGO_PKG_NAME").replace('-', "_");
    if !directives.contains(&format!("{}=", crate_name)) {
        if let Ok(directive) = format!("{}={}", crate_name, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    (filter, level)
}
