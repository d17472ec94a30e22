//! SessionLifecycle - drives a [`SessionHandle`] through authenticate,
//! login and logout.

use super::backend::{AuthBackend, BackendError, SessionLauncher};
use super::state::{SessionHandle, SessionState};
use crate::credentials::LoginInfo;
use crate::exit::ElmExit;
use crate::shell::ProcessExit;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// A session handle shared between threads of an event-driven greeter.
/// Holding the lock for the duration of an operation keeps transitions
/// strictly one at a time.
pub type SharedSession = Arc<Mutex<SessionHandle>>;

pub fn shared_session() -> SharedSession {
    Arc::new(Mutex::new(SessionHandle::new()))
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Cannot {operation} while the session is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Authentication failed for '{0}'")]
    Rejected(String),

    #[error("Authentication backend failed: {0}")]
    AuthBackend(#[source] BackendError),

    #[error("No session selected")]
    NoSessionCommand,

    #[error("Failed to start session '{command}': {source}")]
    LaunchFailed {
        command: String,
        #[source]
        source: BackendError,
    },

    #[error("Failed to stop session: {0}")]
    LogoutFailed(#[source] BackendError),
}

impl SessionError {
    pub fn exit_code(&self) -> ElmExit {
        ElmExit::Login
    }
}

/// Owns the authentication and launch backends; the session itself is the
/// caller's [`SessionHandle`], passed into each operation.
pub struct SessionLifecycle {
    auth: Box<dyn AuthBackend>,
    launcher: Box<dyn SessionLauncher>,
}

impl SessionLifecycle {
    pub fn new(auth: Box<dyn AuthBackend>, launcher: Box<dyn SessionLauncher>) -> Self {
        Self { auth, launcher }
    }

    /// Check credentials. `Idle` (or a finished `LoggedOut`) moves to
    /// `Authenticated` on success and back to `Idle` otherwise.
    ///
    /// `info` is consumed and wiped whatever the outcome.
    pub fn authenticate(&self, handle: &mut SessionHandle, info: LoginInfo) -> Result<(), SessionError> {
        match handle.state() {
            SessionState::Idle => {}
            SessionState::LoggedOut => handle.reset(),
            state => {
                return Err(SessionError::InvalidTransition {
                    operation: "authenticate",
                    state,
                })
            }
        }

        handle.transition(SessionState::Authenticating);
        log::info!("Authenticating credentials of '{}'", info.username());

        let password = info.password();
        let result = self.auth.authenticate(info.username(), &password);
        drop(password);

        match result {
            Ok(true) => {
                handle.set_username(info.username());
                handle.transition(SessionState::Authenticated);
                Ok(())
            }
            Ok(false) => {
                log::warn!("Authentication rejected for '{}'", info.username());
                handle.transition(SessionState::Idle);
                Err(SessionError::Rejected(info.username().to_string()))
            }
            Err(e) => {
                log::error!("Authentication backend failed: {}", e);
                handle.transition(SessionState::Idle);
                Err(SessionError::AuthBackend(e))
            }
        }
    }

    /// Start the user's session. Only valid once authenticated; any failure
    /// returns the handle to `Idle`. Returns the session PID.
    pub fn login(&self, handle: &mut SessionHandle, command: &str) -> Result<u32, SessionError> {
        if handle.state() != SessionState::Authenticated {
            return Err(SessionError::InvalidTransition {
                operation: "log in",
                state: handle.state(),
            });
        }

        if command.trim().is_empty() {
            handle.reset();
            return Err(SessionError::NoSessionCommand);
        }

        log::info!("Logging '{}' into session '{}'", handle.username(), command);

        match self.launcher.launch(handle.username(), command) {
            Ok(process) => {
                let pid = process.id();
                handle.process = Some(process);
                handle.set_session_command(command);
                handle.transition(SessionState::Running);
                Ok(pid)
            }
            Err(source) => {
                log::error!("Unable to start session '{}': {}", command, source);
                handle.reset();
                Err(SessionError::LaunchFailed {
                    command: command.to_string(),
                    source,
                })
            }
        }
    }

    /// Authenticate then log in - one complete login attempt.
    pub fn run_attempt(&self, handle: &mut SessionHandle, info: LoginInfo) -> Result<u32, SessionError> {
        let command = info.session_command().to_string();
        self.authenticate(handle, info)?;
        self.login(handle, &command)
    }

    /// Non-blocking check for the session process having exited by itself.
    pub fn poll_exit(&self, handle: &mut SessionHandle) -> Option<ProcessExit> {
        if handle.state() != SessionState::Running {
            return None;
        }
        let process = handle.process.as_mut()?;
        match process.try_wait() {
            Ok(exit) => exit,
            Err(e) => {
                log::warn!("Unable to query session process: {}", e);
                None
            }
        }
    }

    /// Stop the running session and move to `LoggedOut`.
    ///
    /// If the backend cannot stop the process the handle stays `Running`
    /// with the process still attached, so logout can be retried.
    pub fn logout(&self, handle: &mut SessionHandle) -> Result<ProcessExit, SessionError> {
        if handle.state() != SessionState::Running {
            return Err(SessionError::InvalidTransition {
                operation: "log out",
                state: handle.state(),
            });
        }

        log::info!("Logging out of user session for '{}'", handle.username());

        let Some(mut process) = handle.process.take() else {
            // Running always carries a process; treat a missing one as already gone
            handle.clear();
            handle.transition(SessionState::LoggedOut);
            return Ok(ProcessExit {
                code: 0,
                signal: None,
            });
        };

        match self.launcher.terminate(process.as_mut()) {
            Ok(exit) => {
                log::info!(
                    "Session for '{}' ended (code {}, signal {:?})",
                    handle.username(),
                    exit.code,
                    exit.signal
                );
                handle.clear();
                handle.transition(SessionState::LoggedOut);
                Ok(exit)
            }
            Err(e) => {
                log::error!("Unable to stop session: {}", e);
                handle.process = Some(process);
                Err(SessionError::LogoutFailed(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialTransfer;
    use crate::session::backend::SpawnSessionLauncher;
    use crate::spawn::mock::MockSpawner;
    use crate::spawn::ProcessHandle;
    use secrecy::{ExposeSecret, SecretString};
    use std::io;

    /// Accepts exactly alice / correct-pw.
    struct StubAuth;

    impl AuthBackend for StubAuth {
        fn authenticate(&self, username: &str, password: &SecretString) -> Result<bool, BackendError> {
            Ok(username == "alice" && password.expose_secret() == "correct-pw")
        }
    }

    struct BrokenAuth;

    impl AuthBackend for BrokenAuth {
        fn authenticate(&self, _: &str, _: &SecretString) -> Result<bool, BackendError> {
            Err(BackendError::Io(io::Error::new(io::ErrorKind::Other, "helper crashed")))
        }
    }

    /// Launcher whose terminate always fails.
    struct StubbornLauncher(SpawnSessionLauncher);

    impl SessionLauncher for StubbornLauncher {
        fn launch(&self, username: &str, command: &str) -> Result<Box<dyn ProcessHandle>, BackendError> {
            self.0.launch(username, command)
        }

        fn terminate(&self, _: &mut dyn ProcessHandle) -> Result<ProcessExit, BackendError> {
            Err(BackendError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "no")))
        }
    }

    fn lifecycle(spawner: Arc<MockSpawner>) -> SessionLifecycle {
        SessionLifecycle::new(
            Box::new(StubAuth),
            Box::new(SpawnSessionLauncher::new(spawner)),
        )
    }

    fn info(user: &str, pass: &str, command: &str) -> LoginInfo {
        let mut transfer = CredentialTransfer::new();
        transfer.capture(user, pass, command);
        transfer.consume()
    }

    mod transitions {
        use super::*;

        #[test]
        fn full_cycle() {
            let spawner = Arc::new(MockSpawner::new());
            let manager = lifecycle(spawner.clone());
            let mut handle = SessionHandle::new();

            manager
                .authenticate(&mut handle, info("alice", "correct-pw", ""))
                .unwrap();
            assert_eq!(handle.state(), SessionState::Authenticated);
            assert_eq!(handle.username(), "alice");

            let pid = manager.login(&mut handle, "/usr/bin/bash").unwrap();
            assert_eq!(handle.state(), SessionState::Running);
            assert_eq!(handle.session_pid(), Some(pid));
            assert_eq!(handle.session_command(), Some("/usr/bin/bash"));
            assert_eq!(spawner.programs(), vec!["/usr/bin/bash"]);

            manager.logout(&mut handle).unwrap();
            assert_eq!(handle.state(), SessionState::LoggedOut);
            assert!(handle.session_pid().is_none());
            assert!(spawner.state(0).lock().unwrap().terminated);

            handle.reset();
            assert_eq!(handle.state(), SessionState::Idle);
        }

        #[test]
        fn login_before_authenticate_is_invalid() {
            let spawner = Arc::new(MockSpawner::new());
            let manager = lifecycle(spawner.clone());
            let mut handle = SessionHandle::new();

            let err = manager.login(&mut handle, "/usr/bin/bash").unwrap_err();
            assert!(matches!(
                err,
                SessionError::InvalidTransition {
                    state: SessionState::Idle,
                    ..
                }
            ));
            assert_eq!(handle.state(), SessionState::Idle);
            assert!(spawner.programs().is_empty());
        }

        #[test]
        fn logout_from_idle_is_invalid() {
            let manager = lifecycle(Arc::new(MockSpawner::new()));
            let mut handle = SessionHandle::new();
            assert!(matches!(
                manager.logout(&mut handle),
                Err(SessionError::InvalidTransition { .. })
            ));
        }

        #[test]
        fn logout_from_authenticated_is_invalid() {
            let manager = lifecycle(Arc::new(MockSpawner::new()));
            let mut handle = SessionHandle::new();
            manager
                .authenticate(&mut handle, info("alice", "correct-pw", ""))
                .unwrap();

            assert!(matches!(
                manager.logout(&mut handle),
                Err(SessionError::InvalidTransition {
                    state: SessionState::Authenticated,
                    ..
                })
            ));
            assert_eq!(handle.state(), SessionState::Authenticated);
        }

        #[test]
        fn authenticate_twice_is_invalid() {
            let manager = lifecycle(Arc::new(MockSpawner::new()));
            let mut handle = SessionHandle::new();
            manager
                .authenticate(&mut handle, info("alice", "correct-pw", ""))
                .unwrap();

            let err = manager
                .authenticate(&mut handle, info("alice", "correct-pw", ""))
                .unwrap_err();
            assert!(matches!(err, SessionError::InvalidTransition { .. }));
            assert_eq!(handle.state(), SessionState::Authenticated);
        }

        #[test]
        fn logged_out_handle_can_authenticate_again() {
            let manager = lifecycle(Arc::new(MockSpawner::new()));
            let mut handle = SessionHandle::new();
            manager
                .run_attempt(&mut handle, info("alice", "correct-pw", "bash"))
                .unwrap();
            manager.logout(&mut handle).unwrap();

            manager
                .authenticate(&mut handle, info("alice", "correct-pw", ""))
                .unwrap();
            assert_eq!(handle.state(), SessionState::Authenticated);
        }
    }

    mod failures {
        use super::*;

        #[test]
        fn rejected_credentials_return_to_idle() {
            let manager = lifecycle(Arc::new(MockSpawner::new()));
            let mut handle = SessionHandle::new();

            let err = manager
                .authenticate(&mut handle, info("alice", "wrong", ""))
                .unwrap_err();
            assert!(matches!(err, SessionError::Rejected(ref user) if user == "alice"));
            assert_eq!(handle.state(), SessionState::Idle);
            assert_eq!(handle.username(), "");
        }

        #[test]
        fn truncated_password_is_rejected() {
            let manager = lifecycle(Arc::new(MockSpawner::new()));
            let mut handle = SessionHandle::new();
            let long = format!("correct-pw{}", "!".repeat(40));

            assert!(manager
                .authenticate(&mut handle, info("alice", &long, ""))
                .is_err());
        }

        #[test]
        fn backend_error_returns_to_idle() {
            let manager = SessionLifecycle::new(
                Box::new(BrokenAuth),
                Box::new(SpawnSessionLauncher::new(Arc::new(MockSpawner::new()))),
            );
            let mut handle = SessionHandle::new();

            let err = manager
                .authenticate(&mut handle, info("alice", "correct-pw", ""))
                .unwrap_err();
            assert!(matches!(err, SessionError::AuthBackend(_)));
            assert_eq!(handle.state(), SessionState::Idle);
        }

        #[test]
        fn launch_failure_does_not_leave_authenticated() {
            let spawner = Arc::new(MockSpawner::new());
            spawner.fail_program("/usr/bin/missing-wm");
            let manager = lifecycle(spawner);
            let mut handle = SessionHandle::new();
            manager
                .authenticate(&mut handle, info("alice", "correct-pw", ""))
                .unwrap();

            let err = manager.login(&mut handle, "/usr/bin/missing-wm").unwrap_err();
            assert!(matches!(err, SessionError::LaunchFailed { .. }));
            assert_eq!(handle.state(), SessionState::Idle);
            assert_eq!(handle.username(), "");
        }

        #[test]
        fn empty_command_returns_to_idle() {
            let manager = lifecycle(Arc::new(MockSpawner::new()));
            let mut handle = SessionHandle::new();
            manager
                .authenticate(&mut handle, info("alice", "correct-pw", ""))
                .unwrap();

            let err = manager.login(&mut handle, "  ").unwrap_err();
            assert!(matches!(err, SessionError::NoSessionCommand));
            assert_eq!(handle.state(), SessionState::Idle);
        }

        #[test]
        fn failed_logout_keeps_session_running() {
            let spawner = Arc::new(MockSpawner::new());
            let manager = SessionLifecycle::new(
                Box::new(StubAuth),
                Box::new(StubbornLauncher(SpawnSessionLauncher::new(spawner))),
            );
            let mut handle = SessionHandle::new();
            manager
                .run_attempt(&mut handle, info("alice", "correct-pw", "bash"))
                .unwrap();

            let err = manager.logout(&mut handle).unwrap_err();
            assert!(matches!(err, SessionError::LogoutFailed(_)));
            assert_eq!(handle.state(), SessionState::Running);
            assert!(handle.session_pid().is_some());
        }

        #[test]
        fn errors_map_to_login_exit() {
            let err = SessionError::Rejected("alice".to_string());
            assert_eq!(err.exit_code(), ElmExit::Login);
            assert!(err.to_string().contains("alice"));
        }
    }

    mod attempts {
        use super::*;

        #[test]
        fn run_attempt_uses_captured_session() {
            let spawner = Arc::new(MockSpawner::new());
            let manager = lifecycle(spawner.clone());
            let mut handle = SessionHandle::new();

            manager
                .run_attempt(&mut handle, info("alice", "correct-pw", "startxfce4"))
                .unwrap();
            assert_eq!(handle.state(), SessionState::Running);
            assert_eq!(spawner.programs(), vec!["startxfce4"]);
        }

        #[test]
        fn poll_exit_reports_ended_session() {
            let spawner = Arc::new(MockSpawner::new());
            let manager = lifecycle(spawner.clone());
            let mut handle = SessionHandle::new();
            manager
                .run_attempt(&mut handle, info("alice", "correct-pw", "bash"))
                .unwrap();

            assert!(manager.poll_exit(&mut handle).is_none());
            spawner.state(0).lock().unwrap().exited = Some(ProcessExit {
                code: 0,
                signal: None,
            });
            assert_eq!(
                manager.poll_exit(&mut handle),
                Some(ProcessExit {
                    code: 0,
                    signal: None
                })
            );

            let exit = manager.logout(&mut handle).unwrap();
            assert!(exit.success());
        }

        #[test]
        fn shared_session_serializes_attempts() {
            let spawner = Arc::new(MockSpawner::new());
            let manager = Arc::new(lifecycle(spawner.clone()));
            let shared = shared_session();

            let threads: Vec<_> = (0..4)
                .map(|_| {
                    let manager = Arc::clone(&manager);
                    let shared = Arc::clone(&shared);
                    std::thread::spawn(move || {
                        let mut handle = shared.lock().unwrap();
                        manager
                            .run_attempt(&mut handle, info("alice", "correct-pw", "bash"))
                            .is_ok()
                    })
                })
                .collect();

            let successes = threads
                .into_iter()
                .map(|t| t.join().unwrap())
                .filter(|ok| *ok)
                .count();

            // Only the first attempt finds the handle idle
            assert_eq!(successes, 1);
            assert_eq!(spawner.programs().len(), 1);
            assert_eq!(shared.lock().unwrap().state(), SessionState::Running);
        }
    }
}
