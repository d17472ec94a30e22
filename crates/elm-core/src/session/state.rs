//! Per-session state.

use crate::spawn::ProcessHandle;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a login attempt, used to correlate log lines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle position of the session.
///
/// `Idle -> Authenticating -> Authenticated -> Running -> LoggedOut`, with
/// `LoggedOut` recycling to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Authenticating,
    Authenticated,
    Running,
    LoggedOut,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Authenticating => "authenticating",
            SessionState::Authenticated => "authenticated",
            SessionState::Running => "running",
            SessionState::LoggedOut => "logged out",
        };
        f.write_str(name)
    }
}

/// The caller-owned session value every lifecycle operation acts on.
pub struct SessionHandle {
    id: SessionId,
    state: SessionState,
    username: String,
    session_command: Option<String>,
    pub(crate) process: Option<Box<dyn ProcessHandle>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self {
            id: SessionId::new(),
            state: SessionState::Idle,
            username: String::new(),
            session_command: None,
            process: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The authenticated user, empty before authentication succeeds.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Command the running session was started with.
    pub fn session_command(&self) -> Option<&str> {
        self.session_command.as_deref()
    }

    /// PID of the user session process, if running.
    pub fn session_pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.id())
    }

    /// Recycle a logged-out (or abandoned) handle back to `Idle` with a
    /// fresh id.
    pub fn reset(&mut self) {
        self.clear();
        self.id = SessionId::new();
        self.transition(SessionState::Idle);
    }

    /// Drop the user, command and process without changing state.
    pub(crate) fn clear(&mut self) {
        self.username.clear();
        self.session_command = None;
        self.process = None;
    }

    pub(crate) fn transition(&mut self, to: SessionState) {
        if self.state != to {
            log::info!("Session {}: {} -> {}", self.id, self.state, to);
        }
        self.state = to;
    }

    pub(crate) fn set_username(&mut self, username: &str) {
        self.username = username.to_string();
    }

    pub(crate) fn set_session_command(&mut self, command: &str) {
        self.session_command = Some(command.to_string());
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("username", &self.username)
            .field("session_command", &self.session_command)
            .field("session_pid", &self.session_pid())
            .finish()
    }
}
