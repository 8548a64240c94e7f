//! Log subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured level. Output goes to
//! stderr, or to a file through a non-blocking writer when one is configured.

use crate::config::{LogFormat, LogLevel};
use crate::{Error, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// When logging to a file the returned guard must be kept alive until exit,
/// otherwise buffered lines are lost.
pub fn init_logging(
    level: LogLevel,
    format: LogFormat,
    file: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let (writer, guard) = match file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            (writer, Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let installed = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(false)
                    .with_thread_names(true),
            )
            .try_init(),
        LogFormat::Plain => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(file.is_none())
                    .with_target(false)
                    .with_thread_names(true),
            )
            .try_init(),
    };

    installed.map_err(|e| Error::config(format!("Failed to install log subscriber: {}", e)))?;
    Ok(guard)
}

fn file_writer(path: &Path) -> Result<(BoxMakeWriter, WorkerGuard)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::config(format!("Invalid log file path: {}", path.display())))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    Ok((BoxMakeWriter::new(non_blocking), guard))
}
