//! Command-line handling for session launch commands.
//!
//! Session descriptors carry their launch command as a single `Exec=` string.
//! Before it can be handed to a [`crate::spawn::ProcessSpawner`] it must be
//! split into a program and argument vector, honouring shell-style quoting
//! and dropping the freedesktop field codes (`%f`, `%U`, ...) that only make
//! sense to file managers.
//!
//! # Example
//!
//! ```
//! use elm_core::shell::parse_exec;
//!
//! let argv = parse_exec("startplasma-x11 --debug %U").unwrap();
//! assert_eq!(argv, vec!["startplasma-x11", "--debug"]);
//! ```

use serde::Serialize;
use thiserror::Error;

/// Exit status reported when a child process terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessExit {
    pub code: i32,
    pub signal: Option<i32>,
}

impl ProcessExit {
    /// Whether the process exited normally with status zero.
    pub fn success(&self) -> bool {
        self.code == 0 && self.signal.is_none()
    }
}

impl From<std::process::ExitStatus> for ProcessExit {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code().unwrap_or(-1),
            signal,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExecError {
    #[error("Empty launch command")]
    Empty,

    #[error("Unbalanced quoting in launch command: {0}")]
    Quoting(String),
}

/// Field codes defined by the desktop entry specification.
const FIELD_CODES: [&str; 13] = [
    "%f", "%F", "%u", "%U", "%d", "%D", "%n", "%N", "%i", "%c", "%k", "%v", "%m",
];

/// Split an `Exec=` value into argv.
///
/// Standalone field codes are removed and `%%` collapses to a literal `%`.
pub fn parse_exec(exec: &str) -> Result<Vec<String>, ExecError> {
    let words = shlex::split(exec).ok_or_else(|| ExecError::Quoting(exec.to_string()))?;

    let argv: Vec<String> = words
        .into_iter()
        .filter(|word| !FIELD_CODES.contains(&word.as_str()))
        .map(|word| word.replace("%%", "%"))
        .collect();

    if argv.is_empty() {
        return Err(ExecError::Empty);
    }
    Ok(argv)
}

// ============================================================================
// TESTS
// ============================================================================
