//! Shared logging setup for Vellum binaries.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "vellum_spooler=info,vellum_proto=info";
const MAX_LOG_FILE_SIZE: u64 = 8 * 1024 * 1024;

/// Resolve the Vellum home directory.
///
/// Priority: `VELLUM_HOME`, then `$HOME/.vellum`, then `./.vellum`.
pub fn vellum_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("VELLUM_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .map(|h| h.join(".vellum"))
        .unwrap_or_else(|| PathBuf::from(".").join(".vellum"))
}

pub fn logs_dir() -> PathBuf {
    vellum_home().join("logs")
}

/// Initialize tracing with a size-capped log file and stderr output.
pub fn init_logging(app_name: &str, verbose: bool) -> Result<()> {
    let dir = logs_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    let writer = CappedFileWriter::open(dir, app_name)?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if verbose {
        file_filter.to_string()
    } else {
        "warn".to_string()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::new(console_filter)),
        )
        .init();

    Ok(())
}

struct CappedFile {
    path: PathBuf,
    old_path: PathBuf,
    file: File,
    size: u64,
}

impl CappedFile {
    fn open(dir: PathBuf, base: &str) -> io::Result<Self> {
        let path = dir.join(format!("{base}.log"));
        let old_path = dir.join(format!("{base}.log.old"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            old_path,
            file,
            size,
        })
    }

    /// One generation of history: the current file becomes `.old`.
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.path.exists() {
            fs::rename(&self.path, &self.old_path)?;
        }
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.size = 0;
        Ok(())
    }
}

impl Write for CappedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.size + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[derive(Clone)]
struct CappedFileWriter {
    inner: Arc<Mutex<CappedFile>>,
}

impl CappedFileWriter {
    fn open(dir: PathBuf, base: &str) -> Result<Self> {
        let file = CappedFile::open(dir, base)
            .with_context(|| format!("failed to open log file for {base}"))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

struct CappedFileGuard {
    inner: Arc<Mutex<CappedFile>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CappedFileWriter {
    type Writer = CappedFileGuard;

    fn make_writer(&'a self) -> Self::Writer {
        CappedFileGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for CappedFileGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.flush()
    }
}
