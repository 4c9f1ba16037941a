//! `jjm apply`

use std::io::{self, Write};

use anyhow::Result;
use jjm_core::{ApplyOutcome, ApplyReport, CancelFlag, ChangeKind, Changeset, JobStatus, PreviewOptions, Reconciler};
use tracing::warn;

use crate::cli::ApplyArgs;
use crate::credentials::FileCredentialStore;
use crate::format::{colorize, failure, stdout_color, success, write_metadata_problems};
use crate::prompt;
use crate::session::Session;
use crate::{CommandStatus, stage_failure};

/// Run `apply` against the configured server.
///
/// # Errors
/// Returns an error if the session cannot connect or planning aborts.
pub fn run(session: &Session, args: &ApplyArgs) -> Result<CommandStatus> {
    let store = FileCredentialStore::standard()?;
    let client = session.connect(&store)?;
    let url = session.server_url()?;
    let renderer = session.renderer();
    let mut options = session.reconcile_options(&args.target, args.concurrency)?;
    options.apply.skip_deletes = args.skip_deletes;
    let reconciler = Reconciler::new(&renderer, &client, options);

    let cancel = CancelFlag::new();
    let confirm = |changes: &Changeset| {
        let approved = args.yes || ask(changes, &url);
        if approved {
            install_interrupt_handler(&cancel);
        }
        approved
    };
    execute(args, &reconciler, confirm, &cancel, &mut io::stdout().lock(), stdout_color())
}

fn ask(changes: &Changeset, url: &str) -> bool {
    let pending = changes.counts().pending();
    prompt::confirm(&format!("Apply {pending} change(s) to {url}?")).unwrap_or_else(|e| {
        warn!(error = %e, "could not read confirmation");
        false
    })
}

fn install_interrupt_handler(cancel: &CancelFlag) {
    let flag = cancel.clone();
    let installed = ctrlc::set_handler(move || {
        eprintln!("\nInterrupted: finishing in-flight jobs, skipping the rest...");
        flag.cancel();
    });
    if let Err(e) = installed {
        warn!(error = %e, "could not install interrupt handler");
    }
}

/// Plan, show the preview, and apply after `confirm`.
///
/// # Errors
/// Returns an error if rendering or fetching fails, or `out` fails.
pub fn execute(
    args: &ApplyArgs,
    reconciler: &Reconciler<'_>,
    confirm: impl FnOnce(&Changeset) -> bool,
    cancel: &CancelFlag,
    out: &mut dyn Write,
    color: bool,
) -> Result<CommandStatus> {
    let plan = reconciler.plan().map_err(stage_failure)?;
    if !plan.metadata_problems.is_empty() {
        let problems = plan.metadata_problems.iter().map(|p| (p.job_name.as_str(), p.message.as_str()));
        write_metadata_problems(out, problems, color)?;
        return Ok(CommandStatus::InvalidMetadata);
    }
    let preview = PreviewOptions {
        summarize: args.summarize,
        ..PreviewOptions::default()
    };
    write!(out, "{}", colorize(&plan.preview(&preview), color))?;

    if !plan.has_changes() {
        return Ok(CommandStatus::Success);
    }

    let deletes = plan.changeset.counts().deleted;
    if args.skip_deletes && deletes > 0 {
        writeln!(out, "{deletes} delete(s) will be skipped (--skip-deletes).")?;
    }
    out.flush()?;

    match reconciler.apply(&plan, confirm, cancel) {
        ApplyOutcome::Rejected => {
            writeln!(out, "Apply cancelled; no changes made.")?;
            Ok(CommandStatus::Success)
        }
        ApplyOutcome::Completed(report) => {
            write_report(out, &report, color)?;
            if report.all_succeeded() {
                Ok(CommandStatus::Success)
            } else {
                Ok(CommandStatus::Failed)
            }
        }
    }
}

fn write_report(out: &mut dyn Write, report: &ApplyReport, color: bool) -> Result<()> {
    writeln!(out)?;
    for outcome in report.outcomes() {
        if outcome.kind == ChangeKind::Unchanged {
            continue;
        }
        let line = format!(
            "{} {} {}: {}",
            outcome.kind.marker(),
            outcome.kind.verb(),
            outcome.job_name,
            outcome.status
        );
        let line = match outcome.status {
            JobStatus::Applied => success(&line, color),
            JobStatus::Failed(_) | JobStatus::Cancelled => failure(&line, color),
            JobStatus::NoOp | JobStatus::Skipped => line,
        };
        writeln!(out, "{line}")?;
    }

    let tally = report.tally();
    writeln!(out, "\nApply complete: {tally}")?;
    if report.was_cancelled() {
        writeln!(out, "Interrupted: {} job(s) were not attempted.", tally.cancelled)?;
    }
    Ok(())
}
