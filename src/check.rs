//! `jjm check`

use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use jjm_core::{DefinitionRenderer, MetadataRules, check_definitions};

use crate::cli::CheckArgs;
use crate::format::{failure, stdout_color, success, write_metadata_problems};
use crate::session::{Session, name_filter};
use crate::{CommandStatus, stage_failure};

/// Render and validate the session's definitions. No server access.
///
/// # Errors
/// Returns an error if the definitions cannot be rendered.
pub fn run(session: &Session, args: &CheckArgs) -> Result<CommandStatus> {
    let renderer = session.renderer();
    execute(
        args,
        &session.definitions_dir(),
        &renderer,
        &session.config().metadata,
        &mut io::stdout().lock(),
        stdout_color(),
    )
}

/// Check `definitions_dir` and print the result to `out`.
///
/// # Errors
/// Returns an error if rendering fails or `out` fails.
pub fn execute(
    args: &CheckArgs,
    definitions_dir: &Path,
    renderer: &dyn DefinitionRenderer,
    rules: &MetadataRules,
    out: &mut dyn Write,
    color: bool,
) -> Result<CommandStatus> {
    let filter = name_filter(&args.target)?;
    let report = check_definitions(definitions_dir, renderer, &filter, rules).map_err(stage_failure)?;

    if report.is_ok() {
        let line = format!(
            "{} job(s) OK ({} managed, {} raw).",
            report.jobs(),
            report.managed,
            report.raw
        );
        writeln!(out, "{}", success(&line, color))?;
        return Ok(CommandStatus::Success);
    }

    if !report.problems.is_empty() {
        writeln!(out, "{}", failure("Validation errors", color))?;
        for problem in &report.problems {
            writeln!(out, "  job `{}`: {}", problem.job_name, problem.message)?;
        }
        return Ok(CommandStatus::Failed);
    }

    let problems = report.metadata.iter().map(|p| (p.job_name.as_str(), p.message.as_str()));
    write_metadata_problems(out, problems, color)?;
    Ok(CommandStatus::InvalidMetadata)
}
