//! # lucidity-logging
//!
//! Tracing setup for lucidity.
//!
//! Log lines always go to stderr or a file. Stdout is reserved for the
//! change records the binary prints.
//!
//! ## Key Types
//!
//! - [`LogFormat`] - Output formats (Pretty, JSON, Compact)
//! - [`init_tracing`] - Installs the global subscriber
//!
//! ## Log Formats
//!
//! - `Pretty` - Human-readable output, colored on a terminal
//! - `JSON` - Structured JSON lines
//! - `Compact` - Minimal text output

mod format;

pub use format::LogFormat;
pub use tracing_appender::non_blocking::WorkerGuard;

use std::io;
use std::path::Path;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing for the application.
///
/// `RUST_LOG` overrides `level` when set. With a `log_file`, lines are
/// written by a background worker; keep the returned guard alive until
/// exit so buffered lines are flushed.
pub fn init_tracing(
    level: &str,
    format: LogFormat,
    log_file: Option<&Path>,
) -> io::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (writer, guard) = match log_file {
        Some(path) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(open_appender(path)?);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(io::stderr), None),
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(log_file.is_none())
        .with_target(false);

    let installed = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(layer.compact())
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init(),
    };
    installed.map_err(io::Error::other)?;

    Ok(guard)
}

fn open_appender(path: &Path) -> io::Result<tracing_appender::rolling::RollingFileAppender> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Log file path has no file name: {}", path.display()),
        )
    })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    Ok(tracing_appender::rolling::never(dir, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_appender_creates_parent_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("lucidity.log");

        open_appender(&path).unwrap();
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn test_open_appender_rejects_directory_path() {
        let err = open_appender(Path::new("/")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
