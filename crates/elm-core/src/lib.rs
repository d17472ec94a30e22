//! # elm-core
//!
//! Core logic for elm, an X11 login manager.
//!
//! This crate has no UI toolkit dependency. A presentation layer (the
//! console greeter in `elm-daemon`, or a graphical one) feeds it the three
//! strings a user types and shows it the list of installed sessions.
//!
//! ## Key Concepts
//!
//! - **Session descriptor**: a `.desktop` file naming an installable session
//! - **Display**: the X server, compositor and setup helpers elm starts
//! - **Session**: one user's login, walked through authenticate, login and
//!   logout
//! - **Credential transfer**: the read-once hand-off of typed credentials

pub mod config;
pub mod credentials;
pub mod display;
pub mod exit;
pub mod logging;
pub mod paths;
pub mod power;
pub mod session;
pub mod shell;
pub mod spawn;
pub mod xsessions;

// Re-export commonly used types
pub use config::ElmConfig;
pub use credentials::{CredentialTransfer, LoginInfo};
pub use display::{DisplayError, DisplayHandle, DisplayPipeline};
pub use exit::ElmExit;
pub use session::{SessionHandle, SessionLifecycle, SessionState};
pub use xsessions::{SessionDescriptor, SessionScanner};
