//! Credential transfer from the presentation layer.
//!
//! The greeter hands over three strings - username, password and the chosen
//! session command - and the lifecycle manager consumes them exactly once.
//! Each string lives in a [`BoundedString`] whose capacity is fixed at build
//! time. Overlong input is either rejected ([`CredentialTransfer::capture_strict`])
//! or truncated with the overflowing fields reported back
//! ([`CredentialTransfer::capture`]), never silently.
//!
//! Stored values are zeroised when cleared, consumed or dropped.

use secrecy::zeroize::Zeroize;
use secrecy::SecretString;
use std::fmt;
use thiserror::Error;

/// Size of each credential field including the reserved terminator slot,
/// so at most `CREDENTIAL_BOUND - 1` bytes are kept.
pub const CREDENTIAL_BOUND: usize = 32;

/// Which credential field a report refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialField {
    Username,
    Password,
    SessionCommand,
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CredentialField::Username => "username",
            CredentialField::Password => "password",
            CredentialField::SessionCommand => "session command",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CredentialError {
    #[error("The {field} is too long ({len} bytes, at most {max})")]
    Overflow {
        field: CredentialField,
        len: usize,
        max: usize,
    },
}

/// An owned string of at most `N - 1` bytes, zeroised on clear and drop.
#[derive(Clone, Default)]
pub struct BoundedString<const N: usize> {
    value: String,
}

impl<const N: usize> BoundedString<N> {
    /// Maximum number of bytes kept.
    pub const CAPACITY: usize = N - 1;

    /// Copy `raw`, truncating to capacity on a character boundary.
    /// The flag reports whether anything was dropped.
    pub fn truncating(raw: &str) -> (Self, bool) {
        if raw.len() <= Self::CAPACITY {
            return (Self { value: raw.to_string() }, false);
        }
        let mut end = Self::CAPACITY;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        (
            Self {
                value: raw[..end].to_string(),
            },
            true,
        )
    }

    /// Copy `raw`, refusing input that does not fit.
    pub fn try_new(raw: &str, field: CredentialField) -> Result<Self, CredentialError> {
        if raw.len() > Self::CAPACITY {
            return Err(CredentialError::Overflow {
                field,
                len: raw.len(),
                max: Self::CAPACITY,
            });
        }
        Ok(Self {
            value: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Wipe the contents.
    pub fn clear(&mut self) {
        self.value.zeroize();
    }
}

impl<const N: usize> Drop for BoundedString<N> {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

impl<const N: usize> PartialEq for BoundedString<N> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<const N: usize> Eq for BoundedString<N> {}

impl<const N: usize> fmt::Debug for BoundedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundedString([REDACTED; {} bytes])", self.value.len())
    }
}

pub type CredentialString = BoundedString<CREDENTIAL_BOUND>;

/// Username, password and session command captured for one login attempt.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct LoginInfo {
    username: CredentialString,
    password: CredentialString,
    session_command: CredentialString,
}

impl LoginInfo {
    /// Build from raw strings, truncating overlong fields. Returns the
    /// fields that were truncated.
    pub fn truncating(
        username: &str,
        password: &str,
        session_command: &str,
    ) -> (Self, Vec<CredentialField>) {
        let mut overflowed = Vec::new();
        let mut field = |raw: &str, which: CredentialField| {
            let (value, truncated) = CredentialString::truncating(raw);
            if truncated {
                overflowed.push(which);
            }
            value
        };
        let info = Self {
            username: field(username, CredentialField::Username),
            password: field(password, CredentialField::Password),
            session_command: field(session_command, CredentialField::SessionCommand),
        };
        (info, overflowed)
    }

    /// Build from raw strings, failing on the first overlong field.
    pub fn try_new(
        username: &str,
        password: &str,
        session_command: &str,
    ) -> Result<Self, CredentialError> {
        Ok(Self {
            username: CredentialString::try_new(username, CredentialField::Username)?,
            password: CredentialString::try_new(password, CredentialField::Password)?,
            session_command: CredentialString::try_new(
                session_command,
                CredentialField::SessionCommand,
            )?,
        })
    }

    pub fn username(&self) -> &str {
        self.username.as_str()
    }

    /// The password, wrapped so it cannot be printed by accident.
    pub fn password(&self) -> SecretString {
        SecretString::new(self.password.as_str().to_string())
    }

    pub fn session_command(&self) -> &str {
        self.session_command.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.password.is_empty() && self.session_command.is_empty()
    }

    /// Wipe every field.
    pub fn clear(&mut self) {
        self.username.clear();
        self.password.clear();
        self.session_command.clear();
    }
}

impl fmt::Debug for LoginInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginInfo")
            .field("username", &self.username)
            .field("password", &self.password)
            .field("session_command", &self.session_command)
            .finish()
    }
}

/// Outcome of a lenient capture: the values now held, and which fields had
/// to be cut short.
#[derive(Debug)]
pub struct Capture<'a> {
    pub info: &'a LoginInfo,
    pub overflowed: Vec<CredentialField>,
}

impl Capture<'_> {
    /// True when every field fit without truncation.
    pub fn is_clean(&self) -> bool {
        self.overflowed.is_empty()
    }
}

/// Read-once holder between the greeter and the lifecycle manager.
#[derive(Debug, Default)]
pub struct CredentialTransfer {
    held: LoginInfo,
}

impl CredentialTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the presentation layer's strings, truncating any that exceed
    /// the bound. Truncated fields are logged by name and reported.
    pub fn capture(
        &mut self,
        raw_username: &str,
        raw_password: &str,
        raw_session_choice: &str,
    ) -> Capture<'_> {
        let (info, overflowed) = LoginInfo::truncating(raw_username, raw_password, raw_session_choice);
        for field in &overflowed {
            log::warn!(
                "Truncated {} to {} bytes; authentication will likely fail",
                field,
                CredentialString::CAPACITY
            );
        }
        self.held.clear();
        self.held = info;
        Capture {
            info: &self.held,
            overflowed,
        }
    }

    /// Store the strings only if all of them fit; otherwise keep nothing.
    pub fn capture_strict(
        &mut self,
        raw_username: &str,
        raw_password: &str,
        raw_session_choice: &str,
    ) -> Result<(), CredentialError> {
        self.held.clear();
        self.held = LoginInfo::try_new(raw_username, raw_password, raw_session_choice)?;
        Ok(())
    }

    /// Hand over the held values and leave the holder empty.
    pub fn consume(&mut self) -> LoginInfo {
        std::mem::take(&mut self.held)
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}
