//! `jjm plan`

use std::io::{self, Write};

use anyhow::Result;
use jjm_core::{PreviewOptions, Reconciler};

use crate::cli::PlanArgs;
use crate::credentials::FileCredentialStore;
use crate::format::{OutputFormat, PlanView, colorize, stdout_color, write_metadata_problems};
use crate::session::Session;
use crate::{CommandStatus, stage_failure};

/// Run `plan` against the configured server.
///
/// # Errors
/// Returns an error if the session cannot connect or planning aborts.
pub fn run(session: &Session, args: &PlanArgs) -> Result<CommandStatus> {
    let store = FileCredentialStore::standard()?;
    let client = session.connect(&store)?;
    let renderer = session.renderer();
    let options = session.reconcile_options(&args.target, None)?;
    let reconciler = Reconciler::new(&renderer, &client, options);
    execute(args, &reconciler, &mut io::stdout().lock(), stdout_color())
}

/// Compute the plan and print it to `out`.
///
/// # Errors
/// Returns an error if rendering or fetching fails, or `out` fails.
pub fn execute(args: &PlanArgs, reconciler: &Reconciler<'_>, out: &mut dyn Write, color: bool) -> Result<CommandStatus> {
    let plan = reconciler.plan().map_err(stage_failure)?;
    if !plan.metadata_problems.is_empty() {
        let problems = plan.metadata_problems.iter().map(|p| (p.job_name.as_str(), p.message.as_str()));
        write_metadata_problems(out, problems, color)?;
        return Ok(CommandStatus::InvalidMetadata);
    }

    match args.format {
        OutputFormat::Text => {
            let options = PreviewOptions {
                summarize: args.summarize,
                ..PreviewOptions::default()
            };
            write!(out, "{}", colorize(&plan.preview(&options), color))?;
        }
        OutputFormat::Json | OutputFormat::Yaml => {
            let text = args.format.serialize(&PlanView::new(&plan.changeset))?;
            writeln!(out, "{}", text.trim_end())?;
        }
    }

    if args.detailed_exitcode && plan.has_changes() {
        Ok(CommandStatus::ChangesPending)
    } else {
        Ok(CommandStatus::Success)
    }
}
