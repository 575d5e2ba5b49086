//! Tracing setup: stderr output at the requested level, optional plain-text
//! log file with everything down to debug.

use crate::error::{DoorbellError, Result};
use std::fs::{File, create_dir_all};
use std::path::Path;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Console level for the CLI flags: `-q` → warn, default → info, `-v` →
/// debug, `-vv` and up → trace. Quiet wins over verbose.
pub fn console_level(verbosity: u8, quiet: bool) -> Level {
    if quiet {
        return Level::WARN;
    }
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides the console level. The log file, when given, is
/// truncated and written without ANSI codes.
pub fn init_tracing(verbosity: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let level = console_level(verbosity, quiet);

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity > 0)
        .with_thread_names(verbosity > 1)
        .with_filter(console_filter);

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                create_dir_all(parent)?;
            }
            let file = File::create(path)?;
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_ansi(false)
                    .with_writer(file)
                    .with_filter(EnvFilter::new(Level::DEBUG.to_string())),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| DoorbellError::Other(format!("failed to initialize logging: {e}")))?;

    tracing::debug!(
        "Tracing initialized: console={}, log_file={}",
        level,
        log_file
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    );

    Ok(())
}
