//! `jjm import`

use std::io::{self, Write};

use anyhow::Result;
use jjm_core::Reconciler;

use crate::cli::ImportArgs;
use crate::credentials::FileCredentialStore;
use crate::format::{failure, stdout_color, success};
use crate::session::Session;
use crate::{CommandStatus, stage_failure};

/// Import remote-only jobs from the configured server.
///
/// # Errors
/// Returns an error if the session cannot connect or planning aborts.
pub fn run(session: &Session, args: &ImportArgs) -> Result<CommandStatus> {
    let store = FileCredentialStore::standard()?;
    let client = session.connect(&store)?;
    let renderer = session.renderer();
    let options = session.reconcile_options(&args.target, None)?;
    let reconciler = Reconciler::new(&renderer, &client, options);
    execute(&reconciler, &mut io::stdout().lock(), stdout_color())
}

/// Plan, then write every remote-only job into the definitions directory.
///
/// # Errors
/// Returns an error if planning aborts, the raw job list cannot be written,
/// or `out` fails.
pub fn execute(reconciler: &Reconciler<'_>, out: &mut dyn Write, color: bool) -> Result<CommandStatus> {
    let plan = reconciler.plan().map_err(stage_failure)?;
    let report = reconciler.import(&plan).map_err(stage_failure)?;

    if report.imported.is_empty() && report.failed.is_empty() {
        writeln!(out, "Nothing to import.")?;
        return Ok(CommandStatus::Success);
    }

    for job in &report.imported {
        let line = format!("imported {} -> {}", job.job_name, job.file.display());
        writeln!(out, "{}", success(&line, color))?;
    }
    for job in &report.failed {
        let line = format!("failed {}: {}", job.job_name, job.reason);
        writeln!(out, "{}", failure(&line, color))?;
    }
    writeln!(
        out,
        "\nImport complete: {} imported, {} failed.",
        report.imported.len(),
        report.failed.len()
    )?;

    if report.all_succeeded() {
        Ok(CommandStatus::Success)
    } else {
        Ok(CommandStatus::Failed)
    }
}
