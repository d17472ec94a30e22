//! Shutdown and reboot.

use crate::config::CommandsConfig;
use crate::shell::{parse_exec, ExecError};
use crate::spawn::{ProcessHandle, ProcessSpawner, SpawnConfig, SpawnError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PowerError {
    #[error("Invalid {action} command: {source}")]
    Command {
        action: PowerAction,
        #[source]
        source: ExecError,
    },

    #[error("Failed to {action}: {source}")]
    Spawn {
        action: PowerAction,
        #[source]
        source: SpawnError,
    },

    #[error("Unknown power action: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    Shutdown,
    Reboot,
}

impl PowerAction {
    /// The configured command line for this action.
    pub fn command<'a>(&self, commands: &'a CommandsConfig) -> &'a str {
        match self {
            PowerAction::Shutdown => &commands.shutdown,
            PowerAction::Reboot => &commands.reboot,
        }
    }

    /// Start the configured command. The caller decides whether to wait.
    pub fn run(
        &self,
        commands: &CommandsConfig,
        spawner: &dyn ProcessSpawner,
    ) -> Result<Box<dyn ProcessHandle>, PowerError> {
        let argv = parse_exec(self.command(commands)).map_err(|source| PowerError::Command {
            action: *self,
            source,
        })?;
        let (program, args) = argv.split_first().ok_or(PowerError::Command {
            action: *self,
            source: ExecError::Empty,
        })?;

        log::info!("Requesting {}: {}", self, program);
        spawner
            .spawn(&SpawnConfig::new(program.clone(), args.to_vec()))
            .map_err(|source| PowerError::Spawn {
                action: *self,
                source,
            })
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerAction::Shutdown => f.write_str("shutdown"),
            PowerAction::Reboot => f.write_str("reboot"),
        }
    }
}

impl FromStr for PowerAction {
    type Err = PowerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shutdown" | "poweroff" => Ok(PowerAction::Shutdown),
            "reboot" | "restart" => Ok(PowerAction::Reboot),
            other => Err(PowerError::Unknown(other.to_string())),
        }
    }
}
