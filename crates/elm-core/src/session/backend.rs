//! External collaborators of the session lifecycle.
//!
//! Credential checking and OS session setup are not elm's business: they
//! are delegated through two narrow traits. The provided implementations
//! shell out to configurable helpers.

use crate::shell::{parse_exec, ExecError, ProcessExit};
use crate::spawn::{ProcessHandle, ProcessSpawner, SpawnConfig, SpawnError};
use secrecy::zeroize::Zeroizing;
use secrecy::{ExposeSecret, SecretString};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Interval between exit checks on the authentication helper.
const AUTH_POLL: Duration = Duration::from_millis(20);

/// Grace given to a helper that overran its timeout.
const AUTH_KILL_GRACE: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Spawn(#[from] SpawnError),

    #[error("{0}")]
    Exec(#[from] ExecError),

    #[error("Authentication helper timed out after {0:?}")]
    Timeout(Duration),
}

/// Validates a username/password pair.
pub trait AuthBackend: Send + Sync {
    /// `Ok(false)` means the credentials were rejected; `Err` means the
    /// backend itself could not answer.
    fn authenticate(&self, username: &str, password: &SecretString) -> Result<bool, BackendError>;
}

/// Starts and stops user sessions.
pub trait SessionLauncher: Send + Sync {
    fn launch(&self, username: &str, command: &str) -> Result<Box<dyn ProcessHandle>, BackendError>;

    fn terminate(&self, process: &mut dyn ProcessHandle) -> Result<ProcessExit, BackendError>;
}

/// Authenticates by running a helper program.
///
/// The helper receives `username\npassword\n` on stdin and signals
/// acceptance with exit status 0. A helper still running after the timeout
/// is terminated and the attempt fails.
pub struct CommandAuthBackend {
    spawner: Arc<dyn ProcessSpawner>,
    helper: String,
    timeout: Duration,
}

impl CommandAuthBackend {
    pub fn new(spawner: Arc<dyn ProcessSpawner>, helper: impl Into<String>) -> Self {
        Self {
            spawner,
            helper: helper.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// How long the helper may take to answer.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl AuthBackend for CommandAuthBackend {
    fn authenticate(&self, username: &str, password: &SecretString) -> Result<bool, BackendError> {
        let payload = Zeroizing::new(format!("{}\n{}\n", username, password.expose_secret()));
        let config = SpawnConfig::new(self.helper.as_str(), Vec::new()).stdin(payload.as_bytes());
        let mut helper = self.spawner.spawn(&config)?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(exit) = helper.try_wait()? {
                return Ok(exit.success());
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "{} did not answer within {:?}, stopping it",
                    self.helper,
                    self.timeout
                );
                let _ = helper.terminate(AUTH_KILL_GRACE);
                return Err(BackendError::Timeout(self.timeout));
            }
            thread::sleep(AUTH_POLL);
        }
    }
}

/// Launches sessions through a [`ProcessSpawner`].
///
/// Without a wrapper the descriptor's `Exec` command runs directly. With
/// one, the wrapper is run as `wrapper <username> <argv...>` and is expected
/// to open the OS session and drop privileges before exec'ing argv.
pub struct SpawnSessionLauncher {
    spawner: Arc<dyn ProcessSpawner>,
    wrapper: Option<String>,
    display: Option<String>,
    output_log: Option<PathBuf>,
    grace: Duration,
}

impl SpawnSessionLauncher {
    pub fn new(spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self {
            spawner,
            wrapper: None,
            display: None,
            output_log: None,
            grace: Duration::from_secs(3),
        }
    }

    pub fn wrapper(mut self, wrapper: Option<String>) -> Self {
        self.wrapper = wrapper.filter(|w| !w.trim().is_empty());
        self
    }

    /// Display the session's clients connect to.
    pub fn display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    pub fn output_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_log = Some(path.into());
        self
    }

    /// How long logout waits after asking the session to stop.
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn spawn_config(&self, username: &str, command: &str) -> Result<SpawnConfig, BackendError> {
        let argv = parse_exec(command)?;
        let mut config = match &self.wrapper {
            Some(wrapper) => {
                let mut args = Vec::with_capacity(argv.len() + 1);
                args.push(username.to_string());
                args.extend(argv);
                SpawnConfig::new(wrapper, args)
            }
            None => {
                let mut argv = argv.into_iter();
                // parse_exec never returns an empty argv
                let program = argv.next().unwrap_or_default();
                SpawnConfig::new(program, argv.collect())
            }
        };

        config = config
            .env("USER", username)
            .env("LOGNAME", username)
            .own_process_group();
        if let Some(display) = &self.display {
            config = config.env("DISPLAY", display);
        }
        if let Some(log) = &self.output_log {
            config = config.output_log(log);
        }
        Ok(config)
    }
}

impl SessionLauncher for SpawnSessionLauncher {
    fn launch(&self, username: &str, command: &str) -> Result<Box<dyn ProcessHandle>, BackendError> {
        let config = self.spawn_config(username, command)?;
        Ok(self.spawner.spawn(&config)?)
    }

    fn terminate(&self, process: &mut dyn ProcessHandle) -> Result<ProcessExit, BackendError> {
        Ok(process.terminate(self.grace)?)
    }
}
