//! The running display: server, compositor and setup helpers.

use super::DisplayError;
use crate::spawn::ProcessHandle;
use std::fmt;
use std::io;
use std::time::Duration;

/// Grace period given to display children before they are killed.
const STOP_GRACE: Duration = Duration::from_secs(3);

/// Owns the child processes of one display bring-up. Dropping the handle
/// stops them.
pub struct DisplayHandle {
    display_number: u32,
    tty_number: i32,
    server: Option<Box<dyn ProcessHandle>>,
    compositor: Option<Box<dyn ProcessHandle>>,
    helpers: Vec<Box<dyn ProcessHandle>>,
    stopped: bool,
}

impl DisplayHandle {
    pub(crate) fn new(display_number: u32, tty_number: i32, server: Box<dyn ProcessHandle>) -> Self {
        Self {
            display_number,
            tty_number,
            server: Some(server),
            compositor: None,
            helpers: Vec::new(),
            stopped: false,
        }
    }

    /// A handle for an already-running display we do not own (preview mode).
    pub fn preview(display: &str) -> Self {
        let display_number = display
            .trim_start_matches(|c: char| c != ':')
            .trim_start_matches(':')
            .split('.')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        Self {
            display_number,
            tty_number: 0,
            server: None,
            compositor: None,
            helpers: Vec::new(),
            stopped: false,
        }
    }

    pub fn display_number(&self) -> u32 {
        self.display_number
    }

    pub fn tty_number(&self) -> i32 {
        self.tty_number
    }

    /// Value for the `DISPLAY` variable, e.g. `:0`.
    pub fn display_name(&self) -> String {
        format!(":{}", self.display_number)
    }

    /// Whether this handle started (and owns) a display server.
    pub fn owns_server(&self) -> bool {
        self.server.is_some()
    }

    pub fn server_pid(&self) -> Option<u32> {
        self.server.as_ref().map(|p| p.id())
    }

    pub fn compositor_pid(&self) -> Option<u32> {
        self.compositor.as_ref().map(|p| p.id())
    }

    pub fn has_compositor(&self) -> bool {
        self.compositor.is_some()
    }

    pub(crate) fn set_compositor(&mut self, process: Box<dyn ProcessHandle>) {
        self.compositor = Some(process);
    }

    pub(crate) fn add_helper(&mut self, process: Box<dyn ProcessHandle>) {
        self.helpers.push(process);
    }

    /// Fail if the display server has exited underneath us.
    pub fn check_server(&mut self) -> Result<(), DisplayError> {
        let Some(server) = self.server.as_mut() else {
            return Ok(());
        };
        match server.try_wait() {
            Ok(None) => Ok(()),
            Ok(Some(exit)) => Err(DisplayError::ServerExited(exit)),
            Err(e) => Err(DisplayError::ServerWait(e)),
        }
    }

    /// Stop helpers, the compositor and then the display server.
    ///
    /// Every child is attempted; the first failure is returned.
    pub fn shutdown(&mut self) -> Result<(), DisplayError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let mut first_error = None;
        let children = self
            .helpers
            .iter_mut()
            .chain(self.compositor.iter_mut())
            .chain(self.server.iter_mut());
        for child in children {
            if let Err(e) = child.terminate(STOP_GRACE) {
                log::error!("Unable to stop display child {}: {}", child.id(), e);
                first_error.get_or_insert(e);
            }
        }

        if self.server.is_some() {
            log::info!("Stopped display {}", self.display_name());
        }
        match first_error {
            Some(e) => Err(DisplayError::Stop(e)),
            None => Ok(()),
        }
    }

    /// [`shutdown`](Self::shutdown) on the blocking pool, for async callers.
    pub async fn stop(mut self) -> Result<(), DisplayError> {
        tokio::task::spawn_blocking(move || self.shutdown())
            .await
            .map_err(|e| DisplayError::Stop(io::Error::new(io::ErrorKind::Other, e)))?
    }
}

impl Drop for DisplayHandle {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl fmt::Debug for DisplayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayHandle")
            .field("display_number", &self.display_number)
            .field("tty_number", &self.tty_number)
            .field("server_pid", &self.server_pid())
            .field("compositor_pid", &self.compositor_pid())
            .field("helpers", &self.helpers.len())
            .finish()
    }
}
