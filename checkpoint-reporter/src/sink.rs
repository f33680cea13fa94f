//! Log output destination of the daemon.
//!
//! The sink is opened once at startup. Dropping the returned [`SinkGuard`]
//! flushes it.

use crate::error::{ReporterError, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    Stdout,
    File(PathBuf),
}

impl OutputSink {
    /// `-` means stdout, anything else is a file path.
    pub fn parse(value: &str) -> Self {
        match value {
            "-" => OutputSink::Stdout,
            path => OutputSink::File(PathBuf::from(path)),
        }
    }

    /// Open the sink, appending to an existing file.
    pub fn open(&self) -> Result<(SinkWriter, SinkGuard)> {
        match self {
            OutputSink::Stdout => Ok((SinkWriter::Stdout, SinkGuard { file: None })),
            OutputSink::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                let file = Arc::new(Mutex::new(file));
                Ok((
                    SinkWriter::File(Arc::clone(&file)),
                    SinkGuard { file: Some(file) },
                ))
            }
        }
    }
}

/// Cheap handle the subscriber clones for every event.
#[derive(Clone)]
pub enum SinkWriter {
    Stdout,
    File(Arc<Mutex<File>>),
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SinkWriter::Stdout => io::stdout().write(buf),
            SinkWriter::File(file) => file
                .lock()
                .map_err(|_| io::Error::other("log file lock poisoned"))?
                .write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SinkWriter::Stdout => io::stdout().flush(),
            SinkWriter::File(file) => file
                .lock()
                .map_err(|_| io::Error::other("log file lock poisoned"))?
                .flush(),
        }
    }
}

/// Flushes the sink when dropped.
pub struct SinkGuard {
    file: Option<Arc<Mutex<File>>>,
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        match &self.file {
            Some(file) => {
                if let Ok(mut file) = file.lock() {
                    let _ = file.flush();
                    let _ = file.sync_data();
                }
            }
            None => {
                let _ = io::stdout().flush();
            }
        }
    }
}

/// Install the global subscriber writing to `sink`.
pub fn init_logging(level: &str, sink: &OutputSink) -> Result<SinkGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, guard) = sink.open()?;
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(matches!(sink, OutputSink::Stdout))
        .with_writer(move || writer.clone());

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| ReporterError::Config(format!("failed to initialize logging: {}", e)))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(OutputSink::parse("-"), OutputSink::Stdout);
        assert_eq!(
            OutputSink::parse("/var/log/reporter.txt"),
            OutputSink::File(PathBuf::from("/var/log/reporter.txt"))
        );
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, "earlier run\n").unwrap();

        let sink = OutputSink::File(path.clone());
        let (mut writer, guard) = sink.open().unwrap();
        writer.write_all(b"Checkpoint cp-1 created.\n").unwrap();
        drop(guard);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "earlier run\nCheckpoint cp-1 created.\n");
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sink = OutputSink::File(dir.path().join("missing").join("log.txt"));
        assert!(matches!(sink.open(), Err(ReporterError::Io(_))));
    }
}
