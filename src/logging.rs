use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::HerdError;

// ── FileWriter ───────────────────────────────────────────

/// A `MakeWriter` appending every event to one shared log file.
#[derive(Clone)]
pub struct FileWriter {
    inner: Arc<Mutex<File>>,
}

impl FileWriter {
    /// Open `path` in append mode, creating parent directories.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

/// Writer returned by `MakeWriter::make_writer`.
pub struct FileWriterGuard {
    inner: Arc<Mutex<File>>,
}

impl Write for FileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.inner.lock() {
            Ok(mut f) => f.write(buf),
            Err(_) => Ok(buf.len()), // poisoned: drop the line
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.inner.lock() {
            Ok(mut f) => f.flush(),
            Err(_) => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for FileWriter {
    type Writer = FileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriterGuard {
            inner: self.inner.clone(),
        }
    }
}

// ── Subscriber setup ─────────────────────────────────────

fn terminal_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
            .add_directive("herd=info".parse().expect("valid log directive"))
    }
}

/// Install the global subscriber: a stderr layer and, with `log_file`, an
/// ANSI-free file layer capturing `herd=debug`.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<(), HerdError> {
    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(terminal_filter(verbose));

    let file_layer = match log_file {
        Some(path) => {
            let writer = FileWriter::open(path).map_err(|e| HerdError::Io {
                context: format!("opening log file {}", path.display()),
                source: e,
            })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(EnvFilter::new("herd=debug")),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();
    Ok(())
}
