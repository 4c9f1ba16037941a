//! Reconciliation orchestrator.
//!
//! Sequences the stages of one run:
//!
//! ```text
//! check:   Rendering → validation → metadata
//! plan:    Rendering → Fetching → Diffing → metadata      → Plan
//! apply:   Plan → confirm? → Applying                     → ApplyOutcome
//! import:  Plan → Importing                               → ImportReport
//! ```
//!
//! Rendering happens before any server call, so a broken definition never
//! touches the network. A fatal error in Rendering or Fetching aborts the run
//! with no preview and no mutation; the error's [`Stage`] says where.
//!
//! [`Stage`]: crate::error::Stage

use std::path::{Path, PathBuf};

use jjm_jenkins::JobServer;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::apply::{ApplyOptions, ApplyOutcome, CancelFlag, apply_changeset};
use crate::diff::{Changeset, diff};
use crate::error::{ReconcileError, Stage};
use crate::fetch::{FetchOptions, fetch_actual};
use crate::filter::NameFilter;
use crate::import::{ImportReport, import_missing};
use crate::metadata::{MetadataRules, validate_metadata};
use crate::model::{ActualState, DesiredState, JobKind};
use crate::preview::{PreviewOptions, render_preview};
use crate::render::{DefinitionProblem, DefinitionRenderer, render_desired, validate};

/// Everything a run needs besides the renderer and the server.
#[derive(Clone, Debug)]
pub struct ReconcileOptions {
    /// Directory holding the job definitions.
    pub definitions_dir: PathBuf,
    /// Restricts both sides of the diff (`--target`).
    pub filter: NameFilter,
    /// Fetch tuning.
    pub fetch: FetchOptions,
    /// Apply tuning.
    pub apply: ApplyOptions,
    /// Description metadata every desired job must carry.
    pub metadata: MetadataRules,
}

impl ReconcileOptions {
    /// Defaults for `definitions_dir`.
    pub fn new(definitions_dir: impl Into<PathBuf>) -> Self {
        Self {
            definitions_dir: definitions_dir.into(),
            filter: NameFilter::all(),
            fetch: FetchOptions::default(),
            apply: ApplyOptions::default(),
            metadata: MetadataRules::default(),
        }
    }
}

/// Desired and actual state plus the changeset between them.
#[derive(Clone, Debug)]
pub struct Plan {
    /// Jobs from local definitions (after targeting).
    pub desired: DesiredState,
    /// Jobs on the server (after targeting).
    pub actual: ActualState,
    /// `diff(desired, actual)`.
    pub changeset: Changeset,
    /// Desired jobs whose description metadata breaks the rules.
    pub metadata_problems: Vec<DefinitionProblem>,
}

impl Plan {
    /// The plan as preview text.
    #[must_use]
    pub fn preview(&self, options: &PreviewOptions) -> String {
        render_preview(&self.changeset, options)
    }

    /// Whether applying would send anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.changeset.has_changes()
    }
}

/// Local-only result of `check`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CheckReport {
    /// Jobs produced by the renderer.
    pub managed: usize,
    /// Verbatim jobs.
    pub raw: usize,
    /// Documents that would be rejected.
    pub problems: Vec<CheckProblem>,
    /// Description metadata violations.
    pub metadata: Vec<CheckProblem>,
}

/// Serializable form of a [`DefinitionProblem`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckProblem {
    /// The job.
    pub job_name: String,
    /// What is wrong with it.
    pub message: String,
}

impl From<DefinitionProblem> for CheckProblem {
    fn from(problem: DefinitionProblem) -> Self {
        Self {
            job_name: problem.job_name,
            message: problem.message,
        }
    }
}

impl CheckReport {
    /// Whether every definition passed, metadata included.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty() && self.metadata.is_empty()
    }

    /// Total number of jobs.
    #[must_use]
    pub const fn jobs(&self) -> usize {
        self.managed + self.raw
    }
}

/// Render and validate definitions without contacting a server.
///
/// # Errors
/// Returns [`ReconcileError`] if rendering fails.
#[instrument(skip(renderer, filter, rules), fields(dir = %definitions_dir.display()))]
pub fn check_definitions(
    definitions_dir: &Path,
    renderer: &dyn DefinitionRenderer,
    filter: &NameFilter,
    rules: &MetadataRules,
) -> Result<CheckReport, ReconcileError> {
    info!(stage = %Stage::Rendering, "stage");
    let desired = render_desired(definitions_dir, renderer)?.filtered(|name| filter.matches(name));

    let mut report = CheckReport {
        problems: validate(&desired).into_iter().map(CheckProblem::from).collect(),
        metadata: validate_metadata(&desired, rules).into_iter().map(CheckProblem::from).collect(),
        ..CheckReport::default()
    };
    for doc in desired.iter() {
        match doc.kind() {
            JobKind::Managed => report.managed += 1,
            JobKind::Raw => report.raw += 1,
            JobKind::Unknown => {}
        }
    }
    debug!(
        jobs = report.jobs(),
        problems = report.problems.len(),
        metadata = report.metadata.len(),
        "checked definitions"
    );
    Ok(report)
}

/// One reconciliation session against one server.
pub struct Reconciler<'a> {
    renderer: &'a dyn DefinitionRenderer,
    server: &'a dyn JobServer,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    /// Bind a renderer, a server and options.
    #[must_use]
    pub fn new(renderer: &'a dyn DefinitionRenderer, server: &'a dyn JobServer, options: ReconcileOptions) -> Self {
        Self {
            renderer,
            server,
            options,
        }
    }

    /// The options in use.
    #[must_use]
    pub const fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Render, fetch and diff.
    ///
    /// # Errors
    /// Returns [`ReconcileError`] if rendering or listing the server fails.
    #[instrument(skip(self), fields(dir = %self.options.definitions_dir.display()))]
    pub fn plan(&self) -> Result<Plan, ReconcileError> {
        let filter = &self.options.filter;

        info!(stage = %Stage::Rendering, "stage");
        let desired =
            render_desired(&self.options.definitions_dir, self.renderer)?.filtered(|name| filter.matches(name));

        info!(stage = %Stage::Fetching, "stage");
        let actual = fetch_actual(self.server, &self.options.fetch, filter)?;

        info!(stage = %Stage::Diffing, "stage");
        let changeset = diff(&desired, &actual);
        debug!(counts = %changeset.counts(), "diff computed");

        let metadata_problems = validate_metadata(&desired, &self.options.metadata);
        if !metadata_problems.is_empty() {
            warn!(count = metadata_problems.len(), "description metadata problems");
        }

        Ok(Plan {
            desired,
            actual,
            changeset,
            metadata_problems,
        })
    }

    /// Execute `plan` once `confirm` agrees.
    ///
    /// `confirm` sees the changeset that will be applied and is skipped when
    /// nothing is pending.
    #[instrument(skip_all)]
    pub fn apply(&self, plan: &Plan, confirm: impl FnOnce(&Changeset) -> bool, cancel: &CancelFlag) -> ApplyOutcome {
        let outcome = apply_changeset(&plan.changeset, self.server, confirm, &self.options.apply, cancel);
        if matches!(outcome, ApplyOutcome::Completed(_)) {
            info!(stage = %Stage::Applying, "done");
        }
        outcome
    }

    /// Plan, then apply after `confirm`.
    ///
    /// # Errors
    /// Returns [`ReconcileError`] if planning fails; nothing is applied then.
    pub fn plan_and_apply(
        &self,
        confirm: impl FnOnce(&Changeset) -> bool,
        cancel: &CancelFlag,
    ) -> Result<(Plan, ApplyOutcome), ReconcileError> {
        let plan = self.plan()?;
        let outcome = self.apply(&plan, confirm, cancel);
        Ok((plan, outcome))
    }

    /// Write every remote-only job of `plan` into the definitions directory.
    ///
    /// # Errors
    /// Returns [`ReconcileError::Io`] if the raw job list cannot be updated.
    #[instrument(skip_all)]
    pub fn import(&self, plan: &Plan) -> Result<ImportReport, ReconcileError> {
        info!(stage = %Stage::Importing, "stage");
        import_missing(&plan.changeset, &self.options.definitions_dir)
    }
}
