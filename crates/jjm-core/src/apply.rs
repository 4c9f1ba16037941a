//! Apply executor: changeset → server mutations → [`ApplyReport`].
//!
//! Nothing is sent unless the confirmation gate says yes. Each job is
//! independent: a failed call is recorded on that job's outcome and the
//! remaining jobs still run. Outcomes are reported in changeset order even
//! when calls run concurrently.
//!
//! Calls go out in waves by folder depth. Creates and updates run outermost
//! first so a folder exists before anything is created inside it; deletes
//! run innermost first. Jobs within one wave run concurrently.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use jjm_jenkins::{JobServer, ServerError};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::diff::{Change, ChangeKind, Changeset};
use crate::model::{ancestors, depth};
use crate::pool::run_indexed;

/// What happened to one job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "error")]
pub enum JobStatus {
    /// The server call succeeded.
    Applied,
    /// Nothing to do (Unchanged).
    NoOp,
    /// Not sent because of policy (`--skip-deletes`).
    Skipped,
    /// The server call failed.
    Failed(String),
    /// Not sent because the run was interrupted.
    Cancelled,
}

impl JobStatus {
    /// Applied, NoOp and Skipped count as success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Applied | Self::NoOp | Self::Skipped)
    }

    /// The failure detail, for failed jobs.
    #[must_use]
    pub fn error_detail(&self) -> Option<&str> {
        match self {
            Self::Failed(detail) => Some(detail),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::NoOp => write!(f, "no-op"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed(detail) => write!(f, "failed: {detail}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One row of an [`ApplyReport`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    /// The job.
    pub job_name: String,
    /// The change that was (or would have been) applied.
    pub kind: ChangeKind,
    /// The result.
    #[serde(flatten)]
    pub status: JobStatus,
}

impl JobOutcome {
    /// Whether the job ended in a successful state.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.status.is_success()
    }
}

/// Outcome counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    /// Jobs changed on the server.
    pub applied: usize,
    /// Unchanged jobs.
    pub noop: usize,
    /// Jobs left alone by policy.
    pub skipped: usize,
    /// Jobs whose call failed.
    pub failed: usize,
    /// Jobs not attempted because of an interrupt.
    pub cancelled: usize,
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} applied, {} unchanged, {} skipped, {} failed, {} cancelled.",
            self.applied, self.noop, self.skipped, self.failed, self.cancelled
        )
    }
}

/// Per-job outcomes in changeset order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    outcomes: Vec<JobOutcome>,
}

impl ApplyReport {
    /// Outcomes in changeset order.
    #[must_use]
    pub fn outcomes(&self) -> &[JobOutcome] {
        &self.outcomes
    }

    /// The outcome for `job_name`.
    #[must_use]
    pub fn get(&self, job_name: &str) -> Option<&JobOutcome> {
        self.outcomes.iter().find(|o| o.job_name == job_name)
    }

    /// Whether every job ended in a successful state.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(JobOutcome::success)
    }

    /// Whether any job was skipped because of an interrupt.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.outcomes.iter().any(|o| o.status == JobStatus::Cancelled)
    }

    /// Failed jobs.
    pub fn failures(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| matches!(o.status, JobStatus::Failed(_)))
    }

    /// Outcome counts.
    #[must_use]
    pub fn tally(&self) -> Tally {
        let mut tally = Tally::default();
        for outcome in &self.outcomes {
            match outcome.status {
                JobStatus::Applied => tally.applied += 1,
                JobStatus::NoOp => tally.noop += 1,
                JobStatus::Skipped => tally.skipped += 1,
                JobStatus::Failed(_) => tally.failed += 1,
                JobStatus::Cancelled => tally.cancelled += 1,
            }
        }
        tally
    }
}

/// Apply tuning.
#[derive(Clone, Copy, Debug)]
pub struct ApplyOptions {
    /// Maximum server calls in flight.
    pub concurrency: usize,
    /// Record deletes as skipped instead of deleting.
    pub skip_deletes: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            skip_deletes: false,
        }
    }
}

/// Shared interrupt flag. Raising it stops new calls from being dispatched;
/// calls already in flight finish.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A lowered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn as_atomic(&self) -> &AtomicBool {
        &self.0
    }
}

/// Result of [`apply_changeset`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Confirmation was refused; nothing was sent.
    Rejected,
    /// The changeset was executed (possibly with failures).
    Completed(ApplyReport),
}

/// Execute `changeset` against `server` once `confirm` agrees.
///
/// `confirm` is not consulted when there is nothing to send.
#[instrument(skip_all, fields(pending = changeset.counts().pending()))]
pub fn apply_changeset(
    changeset: &Changeset,
    server: &dyn JobServer,
    confirm: impl FnOnce(&Changeset) -> bool,
    options: &ApplyOptions,
    cancel: &CancelFlag,
) -> ApplyOutcome {
    if changeset.has_changes() && !confirm(changeset) {
        info!("apply rejected; no changes sent");
        return ApplyOutcome::Rejected;
    }

    let changes = changeset.as_slice();
    let deleting: BTreeSet<&str> = changes
        .iter()
        .filter(|change| change.kind == ChangeKind::Delete)
        .map(|change| change.job_name.as_str())
        .collect();

    let mut statuses: Vec<Option<JobStatus>> = vec![None; changes.len()];
    for wave in waves(changes) {
        let results = run_indexed(&wave, options.concurrency, Some(cancel.as_atomic()), |&index| {
            apply_one(&changes[index], server, options, &deleting)
        });
        for (index, status) in wave.into_iter().zip(results) {
            statuses[index] = status;
        }
    }

    let outcomes = changes
        .iter()
        .zip(statuses)
        .map(|(change, status)| JobOutcome {
            job_name: change.job_name.clone(),
            kind: change.kind,
            status: status.unwrap_or(match change.kind {
                ChangeKind::Unchanged => JobStatus::NoOp,
                ChangeKind::Create | ChangeKind::Update | ChangeKind::Delete => JobStatus::Cancelled,
            }),
        })
        .collect();

    let report = ApplyReport { outcomes };
    info!(tally = %report.tally(), "apply finished");
    ApplyOutcome::Completed(report)
}

/// Changeset indices grouped into dispatch waves: writes by ascending folder
/// depth, then deletes by descending depth. Unchanged entries are left out.
fn waves(changes: &[Change]) -> Vec<Vec<usize>> {
    let mut writes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut deletes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (index, change) in changes.iter().enumerate() {
        let level = depth(&change.job_name);
        match change.kind {
            ChangeKind::Create | ChangeKind::Update => writes.entry(level).or_default().push(index),
            ChangeKind::Delete => deletes.entry(level).or_default().push(index),
            ChangeKind::Unchanged => {}
        }
    }
    writes.into_values().chain(deletes.into_values().rev()).collect()
}

fn apply_one(change: &Change, server: &dyn JobServer, options: &ApplyOptions, deleting: &BTreeSet<&str>) -> JobStatus {
    let name = change.job_name.as_str();

    let result: Result<(), ServerError> = match change.kind {
        ChangeKind::Unchanged => return JobStatus::NoOp,
        ChangeKind::Delete if options.skip_deletes => {
            debug!(job = name, "delete skipped");
            return JobStatus::Skipped;
        }
        ChangeKind::Create | ChangeKind::Update => {
            let Some(payload) = change.after.as_ref().and_then(|doc| doc.payload()) else {
                warn!(job = name, kind = %change.kind, "no configuration to send");
                return JobStatus::Failed("no payload to send".to_owned());
            };
            if change.kind == ChangeKind::Create {
                server.create_job(name, payload)
            } else {
                server.update_job(name, payload)
            }
        }
        ChangeKind::Delete => match server.delete_job(name) {
            Err(ServerError::NotFound { .. }) if ancestors(name).any(|folder| deleting.contains(folder)) => {
                debug!(job = name, "already removed with its folder");
                Ok(())
            }
            other => other,
        },
    };

    match result {
        Ok(()) => {
            debug!(job = name, kind = %change.kind, "applied");
            JobStatus::Applied
        }
        Err(err) => {
            warn!(job = name, kind = %change.kind, error = %err, "apply failed");
            JobStatus::Failed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::model::{JobDocument, JobState};
    use jjm_jenkins::{Call, MemoryServer};

    fn state(jobs: &[(&str, &str)]) -> JobState {
        jobs.iter().map(|(n, c)| JobDocument::raw(*n, *c)).collect()
    }

    fn sequential() -> ApplyOptions {
        ApplyOptions {
            concurrency: 1,
            ..ApplyOptions::default()
        }
    }

    fn completed(outcome: ApplyOutcome) -> ApplyReport {
        match outcome {
            ApplyOutcome::Completed(report) => report,
            ApplyOutcome::Rejected => panic!("apply was rejected"),
        }
    }

    #[test]
    fn rejection_sends_nothing() {
        let server = MemoryServer::with_jobs([("old", "<old/>")]);
        let changes = diff(&state(&[("new", "<new/>")]), &state(&[("old", "<old/>")]));

        let outcome = apply_changeset(&changes, &server, |_| false, &sequential(), &CancelFlag::new());

        assert_eq!(outcome, ApplyOutcome::Rejected);
        assert!(server.calls().is_empty());
    }

    #[test]
    fn confirmation_is_skipped_without_pending_changes() {
        let server = MemoryServer::with_jobs([("a", "<a/>")]);
        let changes = diff(&state(&[("a", "<a/>")]), &state(&[("a", "<a/>")]));

        let report = completed(apply_changeset(
            &changes,
            &server,
            |_| panic!("must not ask"),
            &sequential(),
            &CancelFlag::new(),
        ));

        assert_eq!(report.outcomes()[0].status, JobStatus::NoOp);
        assert!(server.calls().is_empty());
    }

    #[test]
    fn calls_follow_change_kind() {
        let server = MemoryServer::with_jobs([("b", "<b1/>"), ("c", "<c/>"), ("d", "<d/>")]);
        let desired = state(&[("a", "<a/>"), ("b", "<b2/>"), ("c", "<c/>")]);
        let actual = state(&[("b", "<b1/>"), ("c", "<c/>"), ("d", "<d/>")]);

        let report = completed(apply_changeset(
            &diff(&desired, &actual),
            &server,
            |_| true,
            &sequential(),
            &CancelFlag::new(),
        ));

        assert!(report.all_succeeded());
        assert_eq!(
            server.calls(),
            vec![Call::Create("a".into()), Call::Update("b".into()), Call::Delete("d".into())]
        );
        assert_eq!(server.config_of("b").as_deref(), Some("<b2/>"));
        assert_eq!(report.tally().noop, 1);
    }

    #[test]
    fn payload_is_the_document_as_supplied() {
        let server = MemoryServer::new();
        let xml = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<project/>\n";
        let desired: JobState = [JobDocument::managed("a", xml)].into_iter().collect();

        completed(apply_changeset(
            &diff(&desired, &JobState::new()),
            &server,
            |_| true,
            &sequential(),
            &CancelFlag::new(),
        ));

        assert_eq!(server.config_of("a").as_deref(), Some(xml));
    }

    #[test]
    fn one_failure_does_not_stop_siblings() {
        let server = MemoryServer::new();
        server.fail_writes_to("b");
        let desired = state(&[("a", "<a/>"), ("b", "<b/>"), ("c", "<c/>")]);

        let report = completed(apply_changeset(
            &diff(&desired, &JobState::new()),
            &server,
            |_| true,
            &ApplyOptions::default(),
            &CancelFlag::new(),
        ));

        assert!(!report.all_succeeded());
        let names: Vec<_> = report.outcomes().iter().map(|o| o.job_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(report.get("a").unwrap().success());
        assert!(report.get("b").unwrap().status.error_detail().unwrap().contains("rejected"));
        assert!(report.get("c").unwrap().success());
        assert_eq!(server.job_names(), vec!["a", "c"]);
    }

    #[test]
    fn skip_deletes_leaves_remote_jobs() {
        let server = MemoryServer::with_jobs([("old", "<old/>")]);
        let options = ApplyOptions {
            skip_deletes: true,
            ..sequential()
        };

        let report = completed(apply_changeset(
            &diff(&JobState::new(), &state(&[("old", "<old/>")])),
            &server,
            |_| true,
            &options,
            &CancelFlag::new(),
        ));

        assert_eq!(report.outcomes()[0].status, JobStatus::Skipped);
        assert!(report.all_succeeded());
        assert!(server.calls().is_empty());
    }

    #[test]
    fn cancelled_before_dispatch_marks_pending_jobs() {
        let server = MemoryServer::new();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let desired = state(&[("a", "<a/>"), ("b", "<b/>"), ("same", "<s/>")]);
        let actual = state(&[("same", "<s/>")]);

        let report = completed(apply_changeset(&diff(&desired, &actual), &server, |_| true, &sequential(), &cancel));

        assert!(report.was_cancelled());
        assert_eq!(report.get("a").unwrap().status, JobStatus::Cancelled);
        assert_eq!(report.get("same").unwrap().status, JobStatus::NoOp);
        assert!(server.calls().is_empty());
        assert_eq!(report.tally().cancelled, 2);
    }

    #[test]
    fn folders_are_created_before_their_contents() {
        let server = MemoryServer::new();
        let desired = state(&[
            ("team", "<folder/>"),
            ("team/build", "<folder/>"),
            ("team/build/nightly", "<project/>"),
            ("team/deploy", "<project/>"),
            ("zeta", "<project/>"),
        ]);

        let report = completed(apply_changeset(
            &diff(&desired, &JobState::new()),
            &server,
            |_| true,
            &ApplyOptions::default(),
            &CancelFlag::new(),
        ));

        assert!(report.all_succeeded(), "{:?}", report.failures().collect::<Vec<_>>());
        let order: Vec<String> = server.calls().iter().map(|c| c.job().to_owned()).collect();
        let at = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(at("team") < at("team/build"));
        assert!(at("team") < at("team/deploy"));
        assert!(at("team/build") < at("team/build/nightly"));
        assert_eq!(server.job_names().len(), 5);
    }

    #[test]
    fn folders_are_deleted_after_their_contents() {
        let actual = state(&[("old", "<folder/>"), ("old/a", "<folder/>"), ("old/a/b", "<project/>")]);
        let server = MemoryServer::with_jobs([("old", "<folder/>"), ("old/a", "<folder/>"), ("old/a/b", "<project/>")]);

        let report = completed(apply_changeset(
            &diff(&JobState::new(), &actual),
            &server,
            |_| true,
            &sequential(),
            &CancelFlag::new(),
        ));

        assert!(report.all_succeeded());
        assert_eq!(
            server.calls(),
            vec![Call::Delete("old/a/b".into()), Call::Delete("old/a".into()), Call::Delete("old".into())]
        );
        assert!(server.job_names().is_empty());
    }

    #[test]
    fn child_already_gone_with_deleted_folder_counts_as_applied() {
        let actual = state(&[("old", "<folder/>"), ("old/job", "<project/>")]);
        let server = MemoryServer::with_jobs([("old", "<folder/>")]);

        let report = completed(apply_changeset(
            &diff(&JobState::new(), &actual),
            &server,
            |_| true,
            &sequential(),
            &CancelFlag::new(),
        ));

        assert_eq!(report.get("old/job").unwrap().status, JobStatus::Applied);
        assert!(report.all_succeeded());
        assert!(server.job_names().is_empty());
    }

    #[test]
    fn missing_child_without_deleted_folder_still_fails() {
        let actual = state(&[("gone", "<project/>")]);
        let server = MemoryServer::new();

        let report = completed(apply_changeset(
            &diff(&JobState::new(), &actual),
            &server,
            |_| true,
            &sequential(),
            &CancelFlag::new(),
        ));

        assert!(report.get("gone").unwrap().status.error_detail().unwrap().contains("not found"));
    }

    #[test]
    fn write_without_payload_is_not_sent() {
        let desired: JobState = [JobDocument::unknown("a", "render produced nothing")].into_iter().collect();
        let server = MemoryServer::new();

        let report = completed(apply_changeset(
            &diff(&desired, &JobState::new()),
            &server,
            |_| true,
            &sequential(),
            &CancelFlag::new(),
        ));

        assert_eq!(report.get("a").unwrap().status, JobStatus::Failed("no payload to send".into()));
        assert!(server.calls().is_empty());
    }

    /// Slow server that raises the cancel flag from inside the first create.
    struct InterruptingServer {
        inner: MemoryServer,
        cancel: CancelFlag,
        trigger: &'static str,
    }

    impl JobServer for InterruptingServer {
        fn whoami(&self) -> Result<String, ServerError> {
            self.inner.whoami()
        }

        fn list_jobs(&self) -> Result<Vec<jjm_jenkins::JobSummary>, ServerError> {
            self.inner.list_jobs()
        }

        fn get_job_config(&self, name: &str) -> Result<String, ServerError> {
            self.inner.get_job_config(name)
        }

        fn create_job(&self, name: &str, config: &str) -> Result<(), ServerError> {
            if name == self.trigger {
                self.cancel.cancel();
            } else {
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            self.inner.create_job(name, config)
        }

        fn update_job(&self, name: &str, config: &str) -> Result<(), ServerError> {
            self.inner.update_job(name, config)
        }

        fn delete_job(&self, name: &str) -> Result<(), ServerError> {
            self.inner.delete_job(name)
        }
    }

    #[test]
    fn cancel_during_parallel_apply_stops_new_dispatches() {
        let cancel = CancelFlag::new();
        let server = InterruptingServer {
            inner: MemoryServer::new(),
            cancel: cancel.clone(),
            trigger: "job-00",
        };
        let desired: JobState = (0..40).map(|i| JobDocument::raw(format!("job-{i:02}"), "<p/>")).collect();
        let options = ApplyOptions {
            concurrency: 4,
            ..ApplyOptions::default()
        };

        let report = completed(apply_changeset(
            &diff(&desired, &JobState::new()),
            &server,
            |_| true,
            &options,
            &cancel,
        ));

        let tally = report.tally();
        assert!(report.was_cancelled());
        assert_eq!(report.get("job-00").unwrap().status, JobStatus::Applied);
        assert!(tally.applied <= 4, "{tally}");
        assert_eq!(tally.applied + tally.cancelled, 40, "{tally}");
        assert_eq!(report.get("job-39").unwrap().status, JobStatus::Cancelled);
        assert_eq!(server.inner.calls().len(), tally.applied);
    }

    #[test]
    fn report_serializes_status_and_error() {
        let outcome = JobOutcome {
            job_name: "a".into(),
            kind: ChangeKind::Create,
            status: JobStatus::Failed("boom".into()),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
        assert_eq!(json["kind"], "create");
    }
}
