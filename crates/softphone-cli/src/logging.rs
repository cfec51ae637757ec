use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

/// Directives used when `RUST_LOG` is unset
pub fn default_directives(level: &str, verbose: bool) -> String {
    let level = if verbose { "debug" } else { level };
    format!("softphone={level},softphone_cli={level},softphone_core={level}")
}

/// Install the global subscriber; `RUST_LOG` takes precedence over `level`
pub fn init_logging(level: &str, verbose: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(level, verbose))
            .map_err(|e| anyhow!("Invalid log level {:?}: {}", level, e))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_thread_ids(false)
        .with_file(verbose)
        .with_line_number(verbose)
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))
}
