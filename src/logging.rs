// 📝 Logging - tracing subscriber for CLI and server
//
// RUST_LOG wins when set; otherwise the configured level applies to this crate and
// the HTTP client stack is kept at warn. Output goes to stderr so the CLI can keep
// stdout for JSON results.

use crate::config::LogFormat;
use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Default filter directives for a configured level
pub fn default_directives(level: &str) -> String {
    format!("{},hyper=warn,reqwest=warn,h2=warn", level.trim().to_lowercase())
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directives(level))
            .map_err(|e| anyhow!("Invalid log level '{}': {}", level, e)),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(level: &str, format: LogFormat) -> Result<()> {
    let filter = build_filter(level)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match format {
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
        LogFormat::Pretty => builder.try_init(),
    };

    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
