//! Host queries for free display numbers and virtual terminals.

use std::io;
use std::path::PathBuf;

/// Highest display number considered when looking for a free one.
const MAX_DISPLAYS: u32 = 64;

/// Answers "which display / VT is free right now".
pub trait HostQuery: Send + Sync {
    /// Lowest display number with no X server bound to it.
    fn free_display(&self) -> Option<u32>;

    /// First unused virtual terminal. `Err` when the console cannot be
    /// queried at all, `Ok(None)` when every VT is taken.
    fn free_vt(&self) -> io::Result<Option<i32>>;
}

/// Queries the running system: X lock files and sockets for displays, the
/// kernel console for VTs.
#[derive(Debug, Clone)]
pub struct SystemHost {
    tmp_dir: PathBuf,
    console: PathBuf,
}

impl SystemHost {
    pub fn new() -> Self {
        Self {
            tmp_dir: PathBuf::from("/tmp"),
            console: PathBuf::from("/dev/tty0"),
        }
    }

    /// Look for X lock files and sockets under another directory (tests).
    pub fn with_tmp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = dir.into();
        self
    }

    pub fn with_console(mut self, console: impl Into<PathBuf>) -> Self {
        self.console = console.into();
        self
    }

    fn display_in_use(&self, n: u32) -> bool {
        self.tmp_dir.join(format!(".X{n}-lock")).exists()
            || self.tmp_dir.join(".X11-unix").join(format!("X{n}")).exists()
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostQuery for SystemHost {
    fn free_display(&self) -> Option<u32> {
        (0..MAX_DISPLAYS).find(|n| !self.display_in_use(*n))
    }

    #[cfg(target_os = "linux")]
    fn free_vt(&self) -> io::Result<Option<i32>> {
        use std::fs::OpenOptions;
        use std::os::unix::fs::OpenOptionsExt;
        use std::os::unix::io::AsRawFd;

        // linux/vt.h
        const VT_OPENQRY: u64 = 0x5600;

        let console = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&self.console)?;

        let mut vt: libc::c_int = -1;
        let rc = unsafe { libc::ioctl(console.as_raw_fd(), VT_OPENQRY as _, &mut vt) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((vt > 0).then_some(vt))
    }

    #[cfg(not(target_os = "linux"))]
    fn free_vt(&self) -> io::Result<Option<i32>> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("VT allocation unsupported for {}", self.console.display()),
        ))
    }
}

#[cfg(test)]
pub(crate) mod fixed {
    use super::*;

    /// Host with canned answers.
    pub struct FixedHost {
        pub display: Option<u32>,
        pub vt: Result<Option<i32>, io::ErrorKind>,
    }

    impl FixedHost {
        pub fn new(display: u32, vt: i32) -> Self {
            Self {
                display: Some(display),
                vt: Ok(Some(vt)),
            }
        }
    }

    impl HostQuery for FixedHost {
        fn free_display(&self) -> Option<u32> {
            self.display
        }

        fn free_vt(&self) -> io::Result<Option<i32>> {
            self.vt.map_err(|kind| io::Error::new(kind, "fixed host"))
        }
    }
}
