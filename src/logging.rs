//! Tracing subscriber setup.
//!
//! Events go to stderr (compact or JSON) so stdout stays clean for command
//! output. `RUST_LOG` wins over the configured level. An optional log file
//! gets a plain-text copy through a non-blocking writer.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or
    /// `invoice_flow=debug,info`.
    pub level: String,
    pub json: bool,
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl LogSettings {
    /// Raise the level to debug for our own crate when `-v` is given.
    pub fn verbose(mut self, verbose: bool) -> Self {
        if verbose {
            self.level = format!("invoice_flow=debug,{}", self.level);
        }
        self
    }
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// Keep the returned guard alive until exit; dropping it flushes and stops
/// the file writer.
pub fn init_tracing(settings: &LogSettings) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &settings.file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter(&settings.level))
        .with(file_layer);

    if settings.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .context("Failed to install tracing subscriber")?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_line_number(false)
                    .with_file(false)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()
            .context("Failed to install tracing subscriber")?;
    }

    Ok(guard)
}

fn file_writer(
    path: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}
