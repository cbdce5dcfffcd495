//! Shared logging initialization for the build step binary.

use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

/// Environment variable holding the log level
pub const LOG_ENV: &str = "DEFENSICS_LOG";

fn parse_level(value: Option<&str>) -> tracing::Level {
    match value
        .unwrap_or("info")
        .trim()
        .to_ascii_lowercase()
        .as_str()
    {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// Initialize process-level tracing output from `DEFENSICS_LOG`.
///
/// Output goes to stderr so stdout stays free for command output. `verbose`
/// forces DEBUG regardless of the environment. Safe to call more than once;
/// only the first call installs the subscriber, and failures are ignored.
pub fn init(verbose: bool) {
    if INIT.get().is_some() {
        return;
    }
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        parse_level(std::env::var(LOG_ENV).ok().as_deref())
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    let _ = INIT.set(());
}
