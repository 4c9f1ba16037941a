//! jjm library crate: the command layer behind the `jjm` binary.
//!
//! Each subcommand lives in its own module with a `run` entry point that
//! wires up the real server and renderer, and an `execute` function that
//! takes those as trait objects so integration tests can drive a command
//! against [`jjm_jenkins::MemoryServer`] without a terminal.

pub mod apply;
pub mod check;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod format;
pub mod import;
pub mod login;
pub mod plan;
pub mod prompt;
pub mod session;
pub mod telemetry;

use std::process::ExitCode;

use anyhow::Result;
use jjm_core::ReconcileError;
use jjm_jenkins::ServerError;

use crate::cli::{Cli, Commands};
use crate::session::Session;

/// How a command finished, mapped onto the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Everything requested was done (or there was nothing to do).
    Success,
    /// Some jobs failed, or validation found problems.
    Failed,
    /// `plan --detailed-exitcode` found pending changes.
    ChangesPending,
    /// Job descriptions break the `[metadata]` rules.
    InvalidMetadata,
}

impl CommandStatus {
    /// Numeric exit code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failed => 1,
            Self::ChangesPending => 2,
            Self::InvalidMetadata => 5,
        }
    }
}

impl From<CommandStatus> for ExitCode {
    fn from(status: CommandStatus) -> Self {
        Self::from(status.code())
    }
}

/// Dispatch a parsed command line.
///
/// # Errors
/// Returns whatever error aborted the command.
pub fn run(cli: &Cli) -> Result<CommandStatus> {
    let session = Session::open(&cli.global)?;
    match &cli.command {
        Commands::Check(args) => check::run(&session, args),
        Commands::Plan(args) => plan::run(&session, args),
        Commands::Apply(args) => apply::run(&session, args),
        Commands::Import(args) => import::run(&session, args),
        Commands::Login => login::run(&session),
    }
}

/// Wrap a fatal reconciliation error with the stage it aborted.
pub(crate) fn stage_failure(err: ReconcileError) -> anyhow::Error {
    let stage = err.stage();
    let login_hint = matches!(
        &err,
        ReconcileError::ServerUnavailable {
            cause: ServerError::Unauthorized { .. }
        }
    );
    let context = if login_hint {
        format!("aborted while {stage} (run `jjm login` to store credentials)")
    } else {
        format!("aborted while {stage}")
    };
    anyhow::Error::new(err).context(context)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(CommandStatus::Success.code(), 0);
        assert_eq!(CommandStatus::Failed.code(), 1);
        assert_eq!(CommandStatus::ChangesPending.code(), 2);
        assert_eq!(CommandStatus::InvalidMetadata.code(), 5);
    }

    #[test]
    fn stage_failure_names_stage() {
        let err = stage_failure(ReconcileError::render(PathBuf::from("jobs"), "bad yaml"));
        let message = format!("{err:#}");
        assert!(message.starts_with("aborted while rendering: "), "{message}");
        assert!(message.contains("bad yaml"), "{message}");
    }

    #[test]
    fn unauthorized_suggests_login() {
        let err = stage_failure(ReconcileError::ServerUnavailable {
            cause: ServerError::Unauthorized {
                url: "https://ci.example".into(),
                status: 401,
            },
        });
        assert!(format!("{err:#}").contains("jjm login"));
    }
}
