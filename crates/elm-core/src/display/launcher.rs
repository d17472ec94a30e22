//! Display server launch.

use super::host::HostQuery;
use super::{DisplayError, DisplayHandle};
use crate::paths::prepare_auth_file;
use crate::spawn::{ProcessSpawner, SpawnConfig};
use std::path::PathBuf;
use std::sync::Arc;

/// Lowest and highest VT numbers the kernel hands out.
const VT_RANGE: std::ops::RangeInclusive<i32> = 1..=63;

/// Starts an X server on a free display and VT.
pub struct DisplayLauncher {
    xserver: String,
    xserver_log: PathBuf,
    xauth_file: PathBuf,
    spawner: Arc<dyn ProcessSpawner>,
    host: Arc<dyn HostQuery>,
}

impl DisplayLauncher {
    pub fn new(
        xserver: impl Into<String>,
        xserver_log: impl Into<PathBuf>,
        xauth_file: impl Into<PathBuf>,
        spawner: Arc<dyn ProcessSpawner>,
        host: Arc<dyn HostQuery>,
    ) -> Self {
        Self {
            xserver: xserver.into(),
            xserver_log: xserver_log.into(),
            xauth_file: xauth_file.into(),
            spawner,
            host,
        }
    }

    /// Arguments binding the server to its display, VT, log and auth file.
    pub fn server_args(&self, display: u32, vt: i32) -> Vec<String> {
        vec![
            "-logverbose".to_string(),
            "-logfile".to_string(),
            self.xserver_log.display().to_string(),
            "-nolisten".to_string(),
            "tcp".to_string(),
            format!(":{display}"),
            "-auth".to_string(),
            self.xauth_file.display().to_string(),
            format!("vt{vt}"),
        ]
    }

    /// Allocate a display and VT and spawn the server on them. The server
    /// is not waited on.
    pub fn bring_up(&self) -> Result<DisplayHandle, DisplayError> {
        log::info!("Starting X server");

        let display = self.host.free_display().ok_or(DisplayError::NoFreeDisplay)?;
        let vt = self
            .host
            .free_vt()
            .map_err(DisplayError::Console)?
            .ok_or(DisplayError::NoFreeVt)?;
        if !VT_RANGE.contains(&vt) {
            return Err(DisplayError::InvalidVt(vt));
        }

        prepare_auth_file(&self.xauth_file).map_err(|source| DisplayError::XAuth {
            path: self.xauth_file.clone(),
            source,
        })?;

        let display_name = format!(":{display}");
        let config = SpawnConfig::new(&self.xserver, self.server_args(display, vt))
            .env("DISPLAY", &display_name);
        let server = self
            .spawner
            .spawn(&config)
            .map_err(DisplayError::ServerSpawn)?;

        log::info!(
            "X server is active on {} (vt{}, pid {})",
            display_name,
            vt,
            server.id()
        );
        Ok(DisplayHandle::new(display, vt, server))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::host::fixed::FixedHost;
    use crate::exit::ElmExit;
    use crate::spawn::mock::MockSpawner;
    use std::io;
    use tempfile::{tempdir, TempDir};

    fn launcher(spawner: Arc<MockSpawner>, host: FixedHost) -> (DisplayLauncher, TempDir) {
        let dir = tempdir().unwrap();
        let launcher = DisplayLauncher::new(
            "/usr/bin/Xorg",
            dir.path().join("Xorg.log"),
            dir.path().join("run/elm.auth"),
            spawner,
            Arc::new(host),
        );
        (launcher, dir)
    }

    #[test]
    fn spawns_server_on_allocated_display_and_vt() {
        let spawner = Arc::new(MockSpawner::new());
        let (launcher, dir) = launcher(spawner.clone(), FixedHost::new(1, 7));

        let handle = launcher.bring_up().unwrap();
        assert_eq!(handle.display_number(), 1);
        assert_eq!(handle.tty_number(), 7);
        assert!(handle.owns_server());

        let spawned = spawner.spawned.lock().unwrap();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].program, "/usr/bin/Xorg");
        let args = &spawned[0].args;
        assert!(args.contains(&":1".to_string()));
        assert!(args.contains(&"vt7".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-nolisten" && w[1] == "tcp"));
        assert!(args
            .windows(2)
            .any(|w| w[0] == "-logfile" && w[1].ends_with("Xorg.log")));
        assert!(args
            .windows(2)
            .any(|w| w[0] == "-auth" && w[1].ends_with("elm.auth")));
        assert_eq!(spawned[0].env_value("DISPLAY"), Some(":1"));
        assert!(dir.path().join("run/elm.auth").exists());
    }

    #[test]
    fn own_environment_is_left_alone() {
        let before = std::env::var_os("DISPLAY");
        let spawner = Arc::new(MockSpawner::new());
        let (launcher, _dir) = launcher(spawner.clone(), FixedHost::new(5, 9));

        launcher.bring_up().unwrap();

        assert_eq!(std::env::var_os("DISPLAY"), before);
        assert_eq!(spawner.spawned.lock().unwrap()[0].env_value("DISPLAY"), Some(":5"));
    }

    #[test]
    fn no_free_display_is_fatal() {
        let spawner = Arc::new(MockSpawner::new());
        let host = FixedHost {
            display: None,
            vt: Ok(Some(7)),
        };
        let (launcher, _dir) = launcher(spawner.clone(), host);

        let err = launcher.bring_up().unwrap_err();
        assert!(matches!(err, DisplayError::NoFreeDisplay));
        assert_eq!(err.exit_code(), ElmExit::XEnvDisplay);
        assert!(spawner.programs().is_empty());
    }

    #[test]
    fn no_free_vt_is_fatal() {
        let host = FixedHost {
            display: Some(0),
            vt: Ok(None),
        };
        let (launcher, _dir) = launcher(Arc::new(MockSpawner::new()), host);
        let err = launcher.bring_up().unwrap_err();
        assert_eq!(err.exit_code(), ElmExit::XEnvVt);
    }

    #[test]
    fn unreadable_console_is_tty_error() {
        let host = FixedHost {
            display: Some(0),
            vt: Err(io::ErrorKind::PermissionDenied),
        };
        let (launcher, _dir) = launcher(Arc::new(MockSpawner::new()), host);
        let err = launcher.bring_up().unwrap_err();
        assert_eq!(err.exit_code(), ElmExit::XEnvTty);
    }

    #[test]
    fn out_of_range_vt_rejected() {
        let (launcher, _dir) = launcher(Arc::new(MockSpawner::new()), FixedHost::new(0, 99));
        let err = launcher.bring_up().unwrap_err();
        assert_eq!(err.exit_code(), ElmExit::XEnvTtyNumber);
    }

    #[test]
    fn spawn_failure_is_fatal() {
        let spawner = Arc::new(MockSpawner::new());
        spawner.fail_program("/usr/bin/Xorg");
        let (launcher, _dir) = launcher(spawner, FixedHost::new(0, 7));

        let err = launcher.bring_up().unwrap_err();
        assert!(matches!(err, DisplayError::ServerSpawn(_)));
        assert_eq!(err.exit_code(), ElmExit::XRun);
    }

    #[test]
    fn unwritable_auth_file_is_xauth_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a directory").unwrap();

        let launcher = DisplayLauncher::new(
            "/usr/bin/Xorg",
            dir.path().join("Xorg.log"),
            blocker.join("elm.auth"),
            Arc::new(MockSpawner::new()),
            Arc::new(FixedHost::new(0, 7)),
        );

        let err = launcher.bring_up().unwrap_err();
        assert_eq!(err.exit_code(), ElmExit::XEnvXauth);
    }
}
