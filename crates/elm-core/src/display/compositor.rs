//! Compositor start-up, ordered after the display server settles.
//!
//! X gives no readiness event we can wait on here, so settling is inferred
//! from the server's log: once its last line has stayed the same for
//! `repeat_count` polls the server is considered up. The wait is bounded by
//! a timeout, backs off between polls and can be cancelled. Starting the
//! compositor a little early or late only risks visual glitches.

use super::{DisplayError, DisplayHandle};
use crate::config::CompositorConfig;
use crate::spawn::{ProcessSpawner, ProcessTable, SpawnConfig};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How much of the log tail is read per poll.
const TAIL_WINDOW: u64 = 4096;

/// Why the wait ended and the compositor was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyReason {
    Preview,
    Settled,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorOutcome {
    /// A compositor was already running; nothing was spawned.
    AlreadyRunning,
    Spawned {
        pid: u32,
        reason: ReadyReason,
        waited: Duration,
    },
    /// Shutdown was requested during the wait.
    Cancelled,
}

/// Tunable wait policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub repeat_count: u32,
    pub timeout: Duration,
    pub initial_poll: Duration,
    pub max_poll: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::from(&CompositorConfig::default())
    }
}

impl From<&CompositorConfig> for ReadinessPolicy {
    fn from(config: &CompositorConfig) -> Self {
        Self {
            repeat_count: config.repeat_count,
            timeout: config.timeout(),
            initial_poll: config.initial_poll(),
            max_poll: config.max_poll(),
        }
    }
}

/// Last complete line of the file at `path`.
///
/// A trailing line still being written (no newline yet) is ignored. A
/// missing or empty file yields `None`.
pub fn read_last_line(path: &Path) -> io::Result<Option<String>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let len = file.metadata()?.len();
    let start = len.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)?;

    let Some(last_newline) = buf.iter().rposition(|b| *b == b'\n') else {
        return Ok(None);
    };
    let complete = &buf[..last_newline];
    let line_start = complete
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);
    let line = String::from_utf8_lossy(&complete[line_start..])
        .trim_end_matches('\r')
        .to_string();
    Ok(Some(line))
}

/// Starts the compositor at most once per display.
pub struct CompositorSynchronizer {
    program: String,
    xserver_log: PathBuf,
    policy: ReadinessPolicy,
    preview: bool,
    spawner: Arc<dyn ProcessSpawner>,
    processes: Arc<dyn ProcessTable>,
}

impl CompositorSynchronizer {
    pub fn new(
        program: impl Into<String>,
        xserver_log: impl Into<PathBuf>,
        spawner: Arc<dyn ProcessSpawner>,
        processes: Arc<dyn ProcessTable>,
    ) -> Self {
        Self {
            program: program.into(),
            xserver_log: xserver_log.into(),
            policy: ReadinessPolicy::default(),
            preview: false,
            spawner,
            processes,
        }
    }

    pub fn policy(mut self, policy: ReadinessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Skip the readiness wait entirely.
    pub fn preview(mut self, preview: bool) -> Self {
        self.preview = preview;
        self
    }

    fn process_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }

    fn already_running(&self, display: &DisplayHandle) -> bool {
        if display.has_compositor() {
            return true;
        }
        match self.processes.count_running(self.process_name()) {
            Ok(count) => count > 0,
            Err(e) => {
                log::warn!("Unable to check for a running compositor: {}", e);
                false
            }
        }
    }

    /// Wait for the display server to settle, then spawn the compositor.
    pub async fn start(
        &self,
        display: &mut DisplayHandle,
        cancel: &CancellationToken,
    ) -> Result<CompositorOutcome, DisplayError> {
        log::info!("Starting compositing manager");

        if self.already_running(display) {
            log::info!("Compositing manager already running");
            return Ok(CompositorOutcome::AlreadyRunning);
        }

        let started = Instant::now();
        let mut interval = self.policy.initial_poll;
        let mut last: Option<String> = None;
        let mut repeats: u32 = 0;

        let reason = loop {
            if self.preview {
                break ReadyReason::Preview;
            }

            match read_last_line(&self.xserver_log) {
                Ok(Some(line)) if !line.is_empty() => {
                    if last.as_deref() == Some(line.as_str()) {
                        repeats += 1;
                    }
                    last = Some(line);
                }
                Ok(_) => {}
                Err(e) => log::debug!("Unable to read {}: {}", self.xserver_log.display(), e),
            }

            if repeats >= self.policy.repeat_count {
                break ReadyReason::Settled;
            }
            if started.elapsed() >= self.policy.timeout {
                break ReadyReason::TimedOut;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Compositor wait cancelled");
                    return Ok(CompositorOutcome::Cancelled);
                }
                _ = tokio::time::sleep(interval) => {}
            }
            interval = (interval * 2).min(self.policy.max_poll);
        };

        let waited = started.elapsed();
        let config = SpawnConfig::new(&self.program, Vec::new()).env("DISPLAY", display.display_name());
        let process = self
            .spawner
            .spawn(&config)
            .map_err(DisplayError::Compositor)?;
        let pid = process.id();
        display.set_compositor(process);

        log::info!(
            "Compositing manager is active (pid {}, {:?} after {:?})",
            pid,
            reason,
            waited
        );
        Ok(CompositorOutcome::Spawned {
            pid,
            reason,
            waited,
        })
    }
}
