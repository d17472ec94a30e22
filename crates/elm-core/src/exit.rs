//! Process exit statuses.
//!
//! Each startup failure has its own exit status so a failed boot can be
//! diagnosed from the service manager without reading logs.

use std::fmt;

/// Closed set of elm exit statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElmExit {
    Success,
    InvalidOption,
    ManagerNew,
    ManagerApp,
    ManagerRun,
    ManagerMkdir,
    SignalSetup,
    Signal,
    ManagerX,
    Prompt,
    BuildWindow,
    BuildApp,
    Thread,
    XInit,
    XEnvDisplay,
    XEnvTty,
    XEnvTtyNumber,
    XEnvXauth,
    XEnvVt,
    XRun,
    XWait,
    XStop,
    Compositor,
    Login,
}

impl ElmExit {
    pub const ALL: [ElmExit; 24] = [
        ElmExit::Success,
        ElmExit::InvalidOption,
        ElmExit::ManagerNew,
        ElmExit::ManagerApp,
        ElmExit::ManagerRun,
        ElmExit::ManagerMkdir,
        ElmExit::SignalSetup,
        ElmExit::Signal,
        ElmExit::ManagerX,
        ElmExit::Prompt,
        ElmExit::BuildWindow,
        ElmExit::BuildApp,
        ElmExit::Thread,
        ElmExit::XInit,
        ElmExit::XEnvDisplay,
        ElmExit::XEnvTty,
        ElmExit::XEnvTtyNumber,
        ElmExit::XEnvXauth,
        ElmExit::XEnvVt,
        ElmExit::XRun,
        ElmExit::XWait,
        ElmExit::XStop,
        ElmExit::Compositor,
        ElmExit::Login,
    ];

    /// Numeric status handed to the OS.
    pub fn code(self) -> i32 {
        match self {
            ElmExit::Success => 0,
            ElmExit::InvalidOption => 1,
            ElmExit::ManagerNew => 10,
            ElmExit::ManagerApp => 11,
            ElmExit::ManagerRun => 12,
            ElmExit::ManagerMkdir => 13,
            ElmExit::SignalSetup => 14,
            ElmExit::Signal => 15,
            ElmExit::ManagerX => 16,
            ElmExit::Prompt => 17,
            ElmExit::BuildWindow => 18,
            ElmExit::BuildApp => 19,
            ElmExit::Thread => 20,
            ElmExit::XInit => 21,
            ElmExit::XEnvDisplay => 22,
            ElmExit::XEnvTty => 23,
            ElmExit::XEnvTtyNumber => 24,
            ElmExit::XEnvXauth => 25,
            ElmExit::XEnvVt => 26,
            ElmExit::XRun => 27,
            ElmExit::XWait => 28,
            ElmExit::XStop => 29,
            ElmExit::Compositor => 30,
            ElmExit::Login => 31,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            ElmExit::Success => "success",
            ElmExit::InvalidOption => "invalid option",
            ElmExit::ManagerNew => "unable to create login manager",
            ElmExit::ManagerApp => "unable to create login application",
            ElmExit::ManagerRun => "login manager failed while running",
            ElmExit::ManagerMkdir => "unable to create runtime directory",
            ElmExit::SignalSetup => "unable to set up signal handling",
            ElmExit::Signal => "terminated by signal",
            ElmExit::ManagerX => "unable to start X",
            ElmExit::Prompt => "unable to display login prompt",
            ElmExit::BuildWindow => "unable to build window",
            ElmExit::BuildApp => "unable to build application",
            ElmExit::Thread => "unable to start worker thread",
            ElmExit::XInit => "unable to initialize X",
            ElmExit::XEnvDisplay => "no free display",
            ElmExit::XEnvTty => "no controlling tty",
            ElmExit::XEnvTtyNumber => "no free tty number",
            ElmExit::XEnvXauth => "unable to prepare X authority file",
            ElmExit::XEnvVt => "no free virtual terminal",
            ElmExit::XRun => "unable to run X server",
            ElmExit::XWait => "failed waiting for X server",
            ElmExit::XStop => "unable to stop X server",
            ElmExit::Compositor => "unable to start compositor",
            ElmExit::Login => "authentication or login failure",
        }
    }
}

impl fmt::Display for ElmExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (exit {})", self.describe(), self.code())
    }
}

impl From<ElmExit> for std::process::ExitCode {
    fn from(exit: ElmExit) -> Self {
        // All codes are below 256
        std::process::ExitCode::from(exit.code() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn codes_are_distinct() {
        let codes: HashSet<i32> = ElmExit::ALL.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), ElmExit::ALL.len());
    }

    #[test]
    fn legacy_values() {
        assert_eq!(ElmExit::Success.code(), 0);
        assert_eq!(ElmExit::InvalidOption.code(), 1);
        assert_eq!(ElmExit::SignalSetup.code(), 14);
        assert_eq!(ElmExit::XEnvDisplay.code(), 22);
        assert_eq!(ElmExit::Compositor.code(), 30);
        assert_eq!(ElmExit::Login.code(), 31);
    }

    #[test]
    fn only_success_is_zero() {
        assert!(ElmExit::ALL
            .iter()
            .filter(|e| **e != ElmExit::Success)
            .all(|e| e.code() != 0));
    }

    #[test]
    fn display_includes_code() {
        assert_eq!(
            ElmExit::XRun.to_string(),
            "unable to run X server (exit 27)"
        );
    }
}
