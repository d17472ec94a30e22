//! Child process spawning and lifecycle.
//!
//! Every process elm starts - the display server, the compositor, setup
//! helpers and the user's session - goes through a [`ProcessSpawner`]. The
//! spawner hands back an owned [`ProcessHandle`] which can be polled and
//! terminated. Spawning is fire-and-forget: nothing here waits for a child
//! unless asked to.
//!
//! [`SystemSpawner`] is the real implementation. Tests substitute their own
//! spawner so no OS processes are created.

use crate::shell::ProcessExit;
use secrecy::zeroize::Zeroizing;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Interval between exit checks while waiting out a termination grace period.
const TERMINATE_POLL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to open output log {path}: {source}")]
    OutputLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Bytes written to a child's stdin right after it starts. Wiped on drop and
/// never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct StdinPayload(Zeroizing<Vec<u8>>);

impl StdinPayload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for StdinPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StdinPayload([REDACTED; {} bytes])", self.0.len())
    }
}

/// Configuration for spawning a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Program to execute
    pub program: String,
    /// Arguments to pass to the program
    pub args: Vec<String>,
    /// Extra environment variables for the child
    pub env: Vec<(String, String)>,
    /// File that receives the child's stdout and stderr (appended)
    pub output_log: Option<PathBuf>,
    /// Put the child in its own process group so termination reaches its
    /// descendants too
    pub own_process_group: bool,
    /// Written to the child's stdin, which is then closed. Without one the
    /// child reads from /dev/null.
    pub stdin: Option<StdinPayload>,
}

impl SpawnConfig {
    /// Create a new spawn config with required fields.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
            output_log: None,
            own_process_group: false,
            stdin: None,
        }
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Redirect stdout and stderr to a file.
    pub fn output_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_log = Some(path.into());
        self
    }

    /// Spawn the child as the leader of a new process group.
    pub fn own_process_group(mut self) -> Self {
        self.own_process_group = true;
        self
    }

    /// Feed `bytes` to the child's stdin.
    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(StdinPayload::new(bytes));
        self
    }

    /// Look up an environment variable set on this config.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// An owned handle to a running (or exited) child process.
pub trait ProcessHandle: Send {
    /// OS process id.
    fn id(&self) -> u32;

    /// Check whether the process has exited, without blocking.
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>>;

    /// Ask the process to stop, escalating to a forced kill once `grace`
    /// has elapsed, and reap it.
    fn terminate(&mut self, grace: Duration) -> io::Result<ProcessExit>;
}

/// Something that can start processes.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, config: &SpawnConfig) -> Result<Box<dyn ProcessHandle>, SpawnError>;
}

/// Query over the processes currently running on the host.
pub trait ProcessTable: Send + Sync {
    /// Number of running processes whose command name equals `name`.
    fn count_running(&self, name: &str) -> io::Result<usize>;
}

// ============================================================================
// SYSTEM IMPLEMENTATION
// ============================================================================

/// Spawns real OS processes through [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSpawner;

impl SystemSpawner {
    pub fn new() -> Self {
        Self
    }

    fn build_command(config: &SpawnConfig) -> Result<Command, SpawnError> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args);
        if config.stdin.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        match &config.output_log {
            Some(path) => {
                let file = open_append(path).map_err(|source| SpawnError::OutputLog {
                    path: path.clone(),
                    source,
                })?;
                let err_file = file.try_clone().map_err(|source| SpawnError::OutputLog {
                    path: path.clone(),
                    source,
                })?;
                cmd.stdout(Stdio::from(file)).stderr(Stdio::from(err_file));
            }
            None => {
                cmd.stdout(Stdio::null()).stderr(Stdio::null());
            }
        }

        #[cfg(unix)]
        if config.own_process_group {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        Ok(cmd)
    }
}

impl ProcessSpawner for SystemSpawner {
    fn spawn(&self, config: &SpawnConfig) -> Result<Box<dyn ProcessHandle>, SpawnError> {
        let mut cmd = Self::build_command(config)?;
        let mut child = cmd.spawn().map_err(|source| SpawnError::Spawn {
            program: config.program.clone(),
            source,
        })?;

        log::debug!("Spawned {} (pid {})", config.program, child.id());

        if let (Some(payload), Some(mut stdin)) = (&config.stdin, child.stdin.take()) {
            // A child that exits without reading closes the pipe early.
            match stdin.write_all(payload.as_bytes()) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                Err(source) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SpawnError::Spawn {
                        program: config.program.clone(),
                        source,
                    });
                }
            }
        }

        Ok(Box::new(ChildProcess {
            child,
            group: config.own_process_group,
            exit: None,
        }))
    }
}

fn open_append(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// A child started by [`SystemSpawner`].
struct ChildProcess {
    child: Child,
    group: bool,
    exit: Option<ProcessExit>,
}

impl ChildProcess {
    #[cfg(unix)]
    fn signal(&self, signal: i32) {
        let pid = self.child.id() as i32;
        let target = if self.group { -pid } else { pid };
        unsafe {
            libc::kill(target, signal);
        }
    }
}

impl ProcessHandle for ChildProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        if let Some(exit) = self.exit {
            return Ok(Some(exit));
        }
        let exit = self.child.try_wait()?.map(ProcessExit::from);
        self.exit = exit;
        Ok(exit)
    }

    fn terminate(&mut self, grace: Duration) -> io::Result<ProcessExit> {
        if let Some(exit) = self.try_wait()? {
            return Ok(exit);
        }

        #[cfg(unix)]
        {
            self.signal(libc::SIGTERM);
            let deadline = Instant::now() + grace;
            while Instant::now() < deadline {
                if let Some(exit) = self.try_wait()? {
                    return Ok(exit);
                }
                thread::sleep(TERMINATE_POLL);
            }
            if self.group {
                self.signal(libc::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        let _ = (grace, Instant::now(), TERMINATE_POLL);

        // Already-exited children make kill() fail; the wait below still reaps.
        let _ = self.child.kill();
        let exit = ProcessExit::from(self.child.wait()?);
        self.exit = Some(exit);
        Ok(exit)
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        // Reap if it already exited; running children are left alone since
        // owners terminate explicitly.
        let _ = self.child.try_wait();
    }
}

/// Reads `/proc/<pid>/comm` to count processes by name.
#[derive(Debug, Clone)]
pub struct ProcFsTable {
    root: PathBuf,
}

impl ProcFsTable {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Use an alternative proc root (tests).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcFsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for ProcFsTable {
    fn count_running(&self, name: &str) -> io::Result<usize> {
        let mut count = 0;
        for entry in fs::read_dir(&self.root)? {
            let Ok(entry) = entry else { continue };
            let file_name = entry.file_name();
            let is_pid = file_name
                .to_str()
                .is_some_and(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()));
            if !is_pid {
                continue;
            }
            // Processes can vanish between readdir and read
            if let Ok(comm) = fs::read_to_string(entry.path().join("comm")) {
                if comm.trim_end() == name {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

// ============================================================================
// TEST DOUBLES
// ============================================================================


// ============================================================================
// TESTS
// ============================================================================
