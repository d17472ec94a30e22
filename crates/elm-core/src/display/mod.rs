//! Display bring-up: X server, compositor and setup helpers.
//!
//! [`DisplayPipeline::bring_up`] runs the whole sequence and returns a
//! [`DisplayHandle`] owning every child it started. In preview mode elm
//! attaches to the display it was started from instead of launching a
//! server, and the compositor is started without waiting.

mod compositor;
mod handle;
mod host;
mod launcher;

pub use compositor::{
    read_last_line, CompositorOutcome, CompositorSynchronizer, ReadinessPolicy, ReadyReason,
};
pub use handle::DisplayHandle;
pub use host::{HostQuery, SystemHost};
pub use launcher::DisplayLauncher;

use crate::config::ElmConfig;
use crate::exit::ElmExit;
use crate::shell::{parse_exec, ProcessExit};
use crate::spawn::{ProcessSpawner, ProcessTable, SpawnConfig, SpawnError};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Display used in preview mode when `DISPLAY` is unset.
const FALLBACK_PREVIEW_DISPLAY: &str = ":0";

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("No free X display number")]
    NoFreeDisplay,

    #[error("Unable to query the console for a free VT: {0}")]
    Console(#[source] io::Error),

    #[error("Console returned an invalid VT number: {0}")]
    InvalidVt(i32),

    #[error("No free virtual terminal")]
    NoFreeVt,

    #[error("Failed to prepare X authority file {path}: {source}")]
    XAuth {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to start X server: {0}")]
    ServerSpawn(#[source] SpawnError),

    #[error("X server exited unexpectedly ({0:?})")]
    ServerExited(ProcessExit),

    #[error("Unable to wait on X server: {0}")]
    ServerWait(#[source] io::Error),

    #[error("Failed to stop display: {0}")]
    Stop(#[source] io::Error),

    #[error("Failed to start compositing manager: {0}")]
    Compositor(#[source] SpawnError),

    #[error("Display bring-up cancelled")]
    Cancelled,
}

impl DisplayError {
    pub fn exit_code(&self) -> ElmExit {
        match self {
            DisplayError::NoFreeDisplay => ElmExit::XEnvDisplay,
            DisplayError::Console(_) => ElmExit::XEnvTty,
            DisplayError::InvalidVt(_) => ElmExit::XEnvTtyNumber,
            DisplayError::NoFreeVt => ElmExit::XEnvVt,
            DisplayError::XAuth { .. } => ElmExit::XEnvXauth,
            DisplayError::ServerSpawn(_) => ElmExit::XRun,
            DisplayError::ServerExited(_) | DisplayError::ServerWait(_) => ElmExit::XWait,
            DisplayError::Stop(_) => ElmExit::XStop,
            DisplayError::Compositor(_) => ElmExit::Compositor,
            DisplayError::Cancelled => ElmExit::Signal,
        }
    }
}

/// The full display start-up sequence.
pub struct DisplayPipeline {
    launcher: DisplayLauncher,
    synchronizer: CompositorSynchronizer,
    setup: Vec<String>,
    preview_display: Option<String>,
    spawner: Arc<dyn ProcessSpawner>,
}

impl DisplayPipeline {
    pub fn from_config(
        config: &ElmConfig,
        spawner: Arc<dyn ProcessSpawner>,
        host: Arc<dyn HostQuery>,
        processes: Arc<dyn ProcessTable>,
    ) -> Self {
        let launcher = DisplayLauncher::new(
            &config.commands.xserver,
            &config.paths.xserver_log,
            &config.paths.xauth_file,
            Arc::clone(&spawner),
            host,
        );
        let synchronizer = CompositorSynchronizer::new(
            &config.commands.compositor,
            &config.paths.xserver_log,
            Arc::clone(&spawner),
            processes,
        )
        .policy(ReadinessPolicy::from(&config.compositor))
        .preview(config.preview);

        let preview_display = config.preview.then(|| {
            std::env::var("DISPLAY").unwrap_or_else(|_| {
                log::warn!(
                    "DISPLAY is not set, previewing on {}",
                    FALLBACK_PREVIEW_DISPLAY
                );
                FALLBACK_PREVIEW_DISPLAY.to_string()
            })
        });

        Self {
            launcher,
            synchronizer,
            setup: config.commands.setup.clone(),
            preview_display,
            spawner,
        }
    }

    /// Attach to `display` instead of launching a server, or disable
    /// preview with `None`.
    pub fn preview(mut self, display: Option<String>) -> Self {
        self.synchronizer = self.synchronizer.preview(display.is_some());
        self.preview_display = display;
        self
    }

    pub fn is_preview(&self) -> bool {
        self.preview_display.is_some()
    }

    /// Start the display server (unless previewing), then the compositor,
    /// then the setup commands.
    ///
    /// Cancellation during the compositor wait stops whatever was already
    /// started and yields [`DisplayError::Cancelled`].
    pub async fn bring_up(&self, cancel: &CancellationToken) -> Result<DisplayHandle, DisplayError> {
        let mut display = match &self.preview_display {
            Some(name) => {
                log::info!("Preview mode, attaching to display {}", name);
                DisplayHandle::preview(name)
            }
            None => self.launcher.bring_up()?,
        };

        match self.synchronizer.start(&mut display, cancel).await? {
            CompositorOutcome::Cancelled => {
                display.stop().await?;
                return Err(DisplayError::Cancelled);
            }
            CompositorOutcome::AlreadyRunning | CompositorOutcome::Spawned { .. } => {}
        }

        display.check_server()?;
        self.run_setup(&mut display);
        Ok(display)
    }

    /// Setup commands are cosmetic; failures are logged and skipped.
    fn run_setup(&self, display: &mut DisplayHandle) {
        for command in &self.setup {
            let argv = match parse_exec(command) {
                Ok(argv) => argv,
                Err(e) => {
                    log::warn!("Skipping setup command {:?}: {}", command, e);
                    continue;
                }
            };
            let (program, args) = match argv.split_first() {
                Some((program, args)) => (program.clone(), args.to_vec()),
                None => continue,
            };

            let config = SpawnConfig::new(program, args).env("DISPLAY", display.display_name());
            match self.spawner.spawn(&config) {
                Ok(process) => {
                    log::debug!("Setup command {:?} started (pid {})", command, process.id());
                    display.add_helper(process);
                }
                Err(e) => log::warn!("Setup command {:?} failed: {}", command, e),
            }
        }
    }
}
