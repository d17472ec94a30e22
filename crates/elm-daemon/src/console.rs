//! Line-oriented greeter on the controlling terminal.
//!
//! Shows the installed sessions, reads a username, password and session
//! choice, and hands them to the lifecycle through a [`CredentialTransfer`].
//! A username of `!shutdown` or `!reboot` requests a power action instead.

use elm_core::config::CommandsConfig;
use elm_core::credentials::CredentialTransfer;
use elm_core::power::PowerAction;
use elm_core::session::{SessionLifecycle, SessionState, SharedSession};
use elm_core::spawn::ProcessSpawner;
use elm_core::xsessions::{SessionDescriptor, SessionScanner};
use elm_core::ElmExit;
use secrecy::zeroize::Zeroizing;
use std::io::{self, BufRead, Write};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often a running session is checked for exit.
const SESSION_POLL: Duration = Duration::from_millis(250);

const POWER_PREFIX: char = '!';

/// One completed prompt.
pub enum Entry {
    Login {
        username: String,
        password: Zeroizing<String>,
        session_command: String,
    },
    Power(PowerAction),
}

/// Resolve the user's session choice against the scanned list.
///
/// Accepts a 1-based index or a label (case-insensitive). An empty answer
/// picks the first session.
pub fn parse_choice<'a>(answer: &str, sessions: &'a [SessionDescriptor]) -> Option<&'a str> {
    let answer = answer.trim();
    if answer.is_empty() {
        return sessions.first().map(|s| s.command.as_str());
    }
    if let Ok(index) = answer.parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| sessions.get(i))
            .map(|s| s.command.as_str());
    }
    sessions
        .iter()
        .find(|s| s.label.eq_ignore_ascii_case(answer))
        .map(|s| s.command.as_str())
}

pub struct Console<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Print `label` and read one line. `None` at end of input.
    fn prompt(&mut self, label: &str) -> io::Result<Option<Zeroizing<String>>> {
        write!(self.output, "{}: ", label)?;
        self.output.flush()?;

        let mut line = Zeroizing::new(String::new());
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }

    pub fn say(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.output, "{}", message)
    }

    pub fn show_sessions(&mut self, sessions: &[SessionDescriptor]) -> io::Result<()> {
        if sessions.is_empty() {
            return writeln!(self.output, "No sessions installed");
        }
        writeln!(self.output, "Sessions:")?;
        for (i, session) in sessions.iter().enumerate() {
            writeln!(self.output, "  {}) {}", i + 1, session.label)?;
        }
        Ok(())
    }

    /// Prompt until a complete entry is read. `None` at end of input.
    pub fn read_entry(&mut self, sessions: &[SessionDescriptor]) -> io::Result<Option<Entry>> {
        loop {
            let Some(username) = self.prompt("login")? else {
                return Ok(None);
            };
            let username = username.trim();
            if username.is_empty() {
                continue;
            }
            if let Some(action) = username.strip_prefix(POWER_PREFIX) {
                match action.parse::<PowerAction>() {
                    Ok(action) => return Ok(Some(Entry::Power(action))),
                    Err(e) => {
                        self.say(&e.to_string())?;
                        continue;
                    }
                }
            }

            let Some(password) = self.prompt("password")? else {
                return Ok(None);
            };
            let Some(choice) = self.prompt("session")? else {
                return Ok(None);
            };
            let Some(session_command) = parse_choice(&choice, sessions) else {
                self.say("No such session")?;
                continue;
            };

            return Ok(Some(Entry::Login {
                username: username.to_string(),
                password,
                session_command: session_command.to_string(),
            }));
        }
    }
}

/// Everything the greeter loop needs from the daemon.
pub struct Greeter<'a> {
    pub lifecycle: &'a SessionLifecycle,
    pub session: &'a SharedSession,
    pub scanner: &'a SessionScanner,
    pub commands: &'a CommandsConfig,
    pub spawner: &'a dyn ProcessSpawner,
    pub cancel: &'a CancellationToken,
}

impl Greeter<'_> {
    /// Serve login attempts until input ends, a power action is taken or
    /// shutdown is requested.
    pub fn run<R: BufRead, W: Write>(&self, console: &mut Console<R, W>) -> Result<(), ElmExit> {
        while !self.cancel.is_cancelled() {
            let sessions = self.scanner.scan();
            console.show_sessions(&sessions).map_err(prompt_failed)?;

            let entry = match console.read_entry(&sessions).map_err(prompt_failed)? {
                Some(entry) => entry,
                None => {
                    log::info!("Console input closed");
                    return Ok(());
                }
            };
            if self.cancel.is_cancelled() {
                log::info!("Shutdown requested, discarding console entry");
                return Ok(());
            }

            match entry {
                Entry::Power(action) => {
                    if let Err(e) = action.run(self.commands, self.spawner) {
                        log::error!("{}", e);
                        console.say(&e.to_string()).map_err(prompt_failed)?;
                        continue;
                    }
                    return Ok(());
                }
                Entry::Login {
                    username,
                    password,
                    session_command,
                } => {
                    let mut transfer = CredentialTransfer::new();
                    let truncated = !transfer
                        .capture(&username, &password, &session_command)
                        .is_clean();
                    drop(password);
                    if truncated {
                        console
                            .say("Input too long and was truncated")
                            .map_err(prompt_failed)?;
                    }

                    let attempt = {
                        let mut handle = self.session.lock().map_err(|_| ElmExit::ManagerRun)?;
                        let attempt = self.lifecycle.run_attempt(&mut handle, transfer.consume());
                        // Shutdown may have been requested while authenticating.
                        if attempt.is_ok() && self.cancel.is_cancelled() {
                            log::info!("Shutdown requested during login, logging out");
                            return self.lifecycle.logout(&mut handle).map(|_| ()).map_err(|e| {
                                log::error!("{}", e);
                                e.exit_code()
                            });
                        }
                        attempt
                    };
                    match attempt {
                        Ok(pid) => {
                            log::info!("Session running as pid {}", pid);
                            self.wait_for_exit()?;
                        }
                        Err(e) => {
                            log::warn!("{}", e);
                            console.say(&format!("Login failed: {}", e)).map_err(prompt_failed)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Block until the running session exits (or shutdown is requested),
    /// then log it out.
    pub fn wait_for_exit(&self) -> Result<(), ElmExit> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            {
                let mut handle = self.session.lock().map_err(|_| ElmExit::ManagerRun)?;
                if handle.state() != SessionState::Running {
                    return Ok(());
                }
                if let Some(exit) = self.lifecycle.poll_exit(&mut handle) {
                    log::info!(
                        "Session for '{}' exited (code {}, signal {:?})",
                        handle.username(),
                        exit.code,
                        exit.signal
                    );
                    return self
                        .lifecycle
                        .logout(&mut handle)
                        .map(|_| ())
                        .map_err(|e| {
                            log::error!("{}", e);
                            e.exit_code()
                        });
                }
            }
            std::thread::sleep(SESSION_POLL);
        }
    }
}

fn prompt_failed(e: io::Error) -> ElmExit {
    log::error!("Console I/O failed: {}", e);
    ElmExit::Prompt
}
