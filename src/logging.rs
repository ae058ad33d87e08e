use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

pub const LOG_FILE: &str = "trigger-updater.log";

/// Writes every log record to stderr and, when available, appends it to the
/// log file. ANSI colors are disabled so the file stays readable.
#[derive(Clone)]
pub(crate) struct TeeMakeWriter {
    file: Option<Arc<Mutex<File>>>,
}

impl<'a> MakeWriter<'a> for TeeMakeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter {
            file: self.file.clone(),
        }
    }
}

pub(crate) struct TeeWriter {
    file: Option<Arc<Mutex<File>>>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(|e| e.into_inner());
            let _ = file.write_all(buf);
        }
        std::io::stderr().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(file) = &self.file {
            let _ = file.lock().unwrap_or_else(|e| e.into_inner()).flush();
        }
        std::io::stderr().flush()
    }
}

fn open_log_file(log_dir: &Path) -> Result<File> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    let path = log_dir.join(LOG_FILE);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

/// Install the global subscriber at INFO, or DEBUG with `--verbose`. A log
/// directory that cannot be created only disables the file half of the tee.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Result<()> {
    let file = match log_dir.map(open_log_file).transpose() {
        Ok(file) => file,
        Err(e) => {
            eprintln!("warning: file logging disabled: {:#}", e);
            None
        }
    };
    let make_writer = TeeMakeWriter {
        file: file.map(|f| Arc::new(Mutex::new(f))),
    };

    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default tracing subscriber failed")?;
    Ok(())
}
