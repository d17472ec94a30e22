//! elm - X11 login manager.

use clap::Parser;
use elm_core::config::{ElmConfig, DEFAULT_CONFIG_PATH};
use elm_core::display::{DisplayHandle, DisplayPipeline, SystemHost};
use elm_core::logging::{open_log_file, utc_timestamp, LogWriter};
use elm_core::paths::ensure_run_dir;
use elm_core::session::{
    shared_session, CommandAuthBackend, SessionLifecycle, SessionState, SharedSession,
    SpawnSessionLauncher,
};
use elm_core::spawn::{ProcFsTable, ProcessSpawner, SystemSpawner};
use elm_core::xsessions::SessionScanner;
use elm_core::ElmExit;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

mod console;

use console::{Console, Greeter};

#[derive(Parser, Debug)]
#[command(name = "elm", version, about = "X11 login manager")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Attach to the current display instead of starting an X server
    #[arg(long)]
    preview: bool,

    /// Print the installed sessions and exit
    #[arg(long)]
    list_sessions: bool,

    /// With --list-sessions, print JSON instead of tab-separated lines
    #[arg(long, requires = "list_sessions")]
    json: bool,

    /// Minimum log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ElmExit::InvalidOption.into()
            } else {
                ElmExit::Success.into()
            };
        }
    };

    let mut config = match ElmConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("elm: {}", e);
            return e.exit_code().into();
        }
    };
    if args.preview {
        config.preview = true;
    }

    init_logging(&config.paths.log_file, args.log_level);

    if args.list_sessions {
        return list_sessions(&config.paths.xsessions_dir, args.json).into();
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Unable to start runtime: {}", e);
            return ElmExit::ManagerNew.into();
        }
    };

    let exit = match runtime.block_on(run(config)) {
        Ok(()) => ElmExit::Success,
        Err(exit) => exit,
    };
    // The console thread may still be blocked on stdin.
    runtime.shutdown_background();

    if exit != ElmExit::Success {
        log::error!("Exiting: {}", exit);
    }
    exit.into()
}

/// Route log records to the operation log, or stderr when it cannot be
/// opened.
fn init_logging(path: &Path, level: log::LevelFilter) {
    let writer = LogWriter::new(open_log_file(Some(path)));
    let attached = writer.is_attached();

    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                utc_timestamp(),
                record.level(),
                record.target(),
                record.args()
            )
        });
    if attached {
        builder.target(env_logger::Target::Pipe(Box::new(writer)));
    }
    builder.init();

    if !attached {
        log::warn!("Unable to open {}, logging to stderr", path.display());
    }
}

fn list_sessions(dir: &Path, json: bool) -> ElmExit {
    let sessions = SessionScanner::new(dir).scan();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let written = if json {
        serde_json::to_writer_pretty(&mut out, &sessions)
            .map_err(io::Error::from)
            .and_then(|()| writeln!(out))
    } else {
        sessions
            .iter()
            .try_for_each(|s| writeln!(out, "{}\t{}", s.label, s.command))
    };
    match written {
        Ok(()) => ElmExit::Success,
        Err(e) => {
            log::error!("Unable to list sessions: {}", e);
            ElmExit::Prompt
        }
    }
}

/// Cancel `token` on SIGTERM, SIGINT or SIGHUP.
fn install_signal_handlers(token: CancellationToken) -> Result<(), ElmExit> {
    let setup_failed = |e: io::Error| {
        log::error!("Unable to install signal handler: {}", e);
        ElmExit::SignalSetup
    };
    let mut sigterm = signal(SignalKind::terminate()).map_err(setup_failed)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(setup_failed)?;
    let mut sighup = signal(SignalKind::hangup()).map_err(setup_failed)?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
            _ = sighup.recv() => "SIGHUP",
        };
        log::info!("Received {}, shutting down", name);
        token.cancel();
    });
    Ok(())
}

async fn run(config: ElmConfig) -> Result<(), ElmExit> {
    log::info!("Starting elm {}", env!("CARGO_PKG_VERSION"));

    if !config.preview {
        ensure_run_dir(&config.paths.run_dir).map_err(|e| {
            log::error!(
                "Unable to create {}: {}",
                config.paths.run_dir.display(),
                e
            );
            ElmExit::ManagerMkdir
        })?;
    }

    let cancel = CancellationToken::new();
    install_signal_handlers(cancel.clone())?;

    let spawner: Arc<dyn ProcessSpawner> = Arc::new(SystemSpawner::new());
    let pipeline = DisplayPipeline::from_config(
        &config,
        Arc::clone(&spawner),
        Arc::new(SystemHost::new()),
        Arc::new(ProcFsTable::new()),
    );
    let display = pipeline.bring_up(&cancel).await.map_err(|e| {
        log::error!("{}", e);
        e.exit_code()
    })?;

    let mut launcher = SpawnSessionLauncher::new(Arc::clone(&spawner))
        .wrapper(config.session.launch_wrapper.clone())
        .display(display.display_name())
        .grace(config.session.logout_grace());
    if !config.preview {
        launcher = launcher.output_log(config.paths.run_dir.join("session.log"));
    }
    let lifecycle = Arc::new(SessionLifecycle::new(
        Box::new(
            CommandAuthBackend::new(Arc::clone(&spawner), config.session.auth_helper.as_str())
                .timeout(config.session.auth_timeout()),
        ),
        Box::new(launcher),
    ));
    let session = shared_session();

    let greeter = {
        let lifecycle = Arc::clone(&lifecycle);
        let session = Arc::clone(&session);
        let spawner = Arc::clone(&spawner);
        let cancel = cancel.clone();
        let scanner = SessionScanner::new(&config.paths.xsessions_dir);
        let commands = config.commands.clone();
        tokio::task::spawn_blocking(move || {
            let greeter = Greeter {
                lifecycle: &lifecycle,
                session: &session,
                scanner: &scanner,
                commands: &commands,
                spawner: spawner.as_ref(),
                cancel: &cancel,
            };
            let stdin = io::stdin();
            let mut console = Console::new(stdin.lock(), io::stdout());
            greeter.run(&mut console)
        })
    };

    let outcome = tokio::select! {
        joined = greeter => match joined {
            Ok(result) => result,
            Err(e) => {
                log::error!("Greeter thread failed: {}", e);
                Err(ElmExit::Thread)
            }
        },
        _ = cancel.cancelled() => Err(ElmExit::Signal),
    };

    shutdown(lifecycle, session, display).await?;
    outcome
}

/// Log out any running session, then stop the display. Both steps block on
/// child processes, so they run on the blocking pool.
async fn shutdown(
    lifecycle: Arc<SessionLifecycle>,
    session: SharedSession,
    display: DisplayHandle,
) -> Result<(), ElmExit> {
    let logout = tokio::task::spawn_blocking(move || match session.lock() {
        Ok(mut handle) if handle.state() == SessionState::Running => {
            if let Err(e) = lifecycle.logout(&mut handle) {
                log::error!("{}", e);
            }
        }
        Ok(_) => {}
        Err(_) => log::error!("Session state poisoned, skipping logout"),
    });
    if let Err(e) = logout.await {
        log::error!("Logout task failed: {}", e);
    }

    display.stop().await.map_err(|e| {
        log::error!("{}", e);
        e.exit_code()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_defaults() {
        let args = Args::try_parse_from(["elm"]).unwrap();
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!args.preview);
        assert!(!args.list_sessions);
        assert_eq!(args.log_level, log::LevelFilter::Info);
    }

    #[test]
    fn parses_flags() {
        let args = Args::try_parse_from([
            "elm",
            "--config",
            "/tmp/elm.toml",
            "--preview",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("/tmp/elm.toml"));
        assert!(args.preview);
        assert_eq!(args.log_level, log::LevelFilter::Debug);
    }

    #[test]
    fn json_requires_list_sessions() {
        assert!(Args::try_parse_from(["elm", "--json"]).is_err());
        let args = Args::try_parse_from(["elm", "--list-sessions", "--json"]).unwrap();
        assert!(args.json);
    }

    #[test]
    fn rejects_unknown_flag() {
        let err = Args::try_parse_from(["elm", "--bogus"]).unwrap_err();
        assert!(err.use_stderr());
    }

    #[test]
    fn rejects_bad_log_level() {
        assert!(Args::try_parse_from(["elm", "--log-level", "loud"]).is_err());
    }
}
