//! Append-only operation log.
//!
//! elm keeps two text logs: the general operation log written through this
//! module, and the display server's own log which the server writes itself.
//! The daemon routes the `log` facade into a [`LogWriter`] so every
//! `log::info!` in the library lands in the operation log.

use chrono::{SecondsFormat, Utc};
use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
    sync::{Arc, Mutex},
};

/// Thread-safe handle to an append-only log file.
pub type LogHandle = Arc<Mutex<Option<File>>>;

/// Current UTC time as ISO 8601 with milliseconds (e.g. 2026-02-04T10:15:30.123Z).
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Open (or create) the log file at `path`, creating parent directories.
///
/// With no path, or when the file cannot be opened, the handle is empty and
/// writes are discarded.
pub fn open_log_file(path: Option<&Path>) -> LogHandle {
    let file = path.and_then(|path| {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok()?;
        }
        OpenOptions::new().create(true).append(true).open(path).ok()
    });
    Arc::new(Mutex::new(file))
}

/// `io::Write` adapter over a [`LogHandle`], used as a logger pipe target.
#[derive(Clone)]
pub struct LogWriter {
    handle: LogHandle,
}

impl LogWriter {
    pub fn new(handle: LogHandle) -> Self {
        Self { handle }
    }

    /// Whether writes reach a file.
    pub fn is_attached(&self) -> bool {
        self.handle.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .handle
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log handle poisoned"))?;
        match guard.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .handle
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log handle poisoned"))?;
        match guard.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}
