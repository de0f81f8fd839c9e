//! Shared logging utilities for the signwatch binary.
//!
//! Console output always goes to stdout. When a log file is configured, every
//! event is also appended to it as a single plain-text line.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "signwatch=info";
const VERBOSE_LOG_FILTER: &str = "signwatch=debug";

/// Logging configuration for the signwatch binary.
pub struct LogConfig<'a> {
    pub verbose: bool,
    /// Optional append-only log file.
    pub log_file: Option<&'a Path>,
}

/// Initialize tracing with console output and an optional append-only file.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let file_layer = match config.log_file {
        Some(path) => {
            let writer = AppendFileWriter::open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(false)
                    .with_filter(env_filter(config.verbose)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false)
                .with_filter(env_filter(config.verbose)),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// `RUST_LOG` wins when set; otherwise the crate default, or debug with `verbose`.
pub fn env_filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new(VERBOSE_LOG_FILTER);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Append-mode file writer shared between tracing events.
#[derive(Clone)]
pub struct AppendFileWriter {
    inner: Arc<Mutex<File>>,
}

impl AppendFileWriter {
    /// Open (or create) `path` for appending, creating parent directories.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

pub struct AppendFileWriterGuard {
    inner: Arc<Mutex<File>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for AppendFileWriter {
    type Writer = AppendFileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        AppendFileWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for AppendFileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut file = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        file.flush()
    }
}
