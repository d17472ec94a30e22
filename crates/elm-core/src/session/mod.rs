//! User session lifecycle.
//!
//! A login attempt walks one [`SessionHandle`] through authenticate, login
//! and logout. The handle is owned by the caller and passed into each
//! [`SessionLifecycle`] operation; only one session is ever active.

mod backend;
mod manager;
mod state;

pub use backend::{
    AuthBackend, BackendError, CommandAuthBackend, SessionLauncher, SpawnSessionLauncher,
};
pub use manager::{shared_session, SessionError, SessionLifecycle, SharedSession};
pub use state::{SessionHandle, SessionId, SessionState};
