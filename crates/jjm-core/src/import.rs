//! Import remote-only jobs into the definitions directory as raw jobs.
//!
//! Every Delete entry of a changeset is a job that exists on the server but
//! has no local definition. Its config is written next to the definitions as
//! `<name>.xml` (`/` becomes `_`) and a `project-type: raw` entry that
//! includes it is appended to [`RAW_JOBS_FILE`]. A later plan then sees the
//! job as Unchanged.

use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::diff::{ChangeKind, Changeset};
use crate::error::ReconcileError;

/// Definition file that collects imported raw jobs.
pub const RAW_JOBS_FILE: &str = "raw_xml_jobs.yaml";

/// One job written to disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImportedJob {
    /// The job.
    pub job_name: String,
    /// The config file written for it.
    pub file: PathBuf,
}

/// One job that could not be imported.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImportFailure {
    /// The job.
    pub job_name: String,
    /// Why it was not imported.
    pub reason: String,
}

/// Result of [`import_missing`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Jobs written, in name order.
    pub imported: Vec<ImportedJob>,
    /// Jobs skipped with a reason, in name order.
    pub failed: Vec<ImportFailure>,
}

impl ImportReport {
    /// Whether every remote-only job was imported.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// File name used for a job's imported config.
#[must_use]
pub fn config_file_name(job_name: &str) -> String {
    format!("{}.xml", job_name.replace('/', "_"))
}

/// Persist every remote-only job of `changeset` into `definitions_dir`.
///
/// Per-job problems (unreadable remote config, a config file already on disk)
/// are reported and do not stop the others.
///
/// # Errors
/// Returns [`ReconcileError::Io`] if [`RAW_JOBS_FILE`] cannot be updated.
#[instrument(skip(changeset), fields(dir = %definitions_dir.display()))]
pub fn import_missing(changeset: &Changeset, definitions_dir: &Path) -> Result<ImportReport, ReconcileError> {
    let mut report = ImportReport::default();
    let mut entries = String::new();

    for change in changeset.iter().filter(|c| c.kind == ChangeKind::Delete) {
        let name = change.job_name.as_str();
        let Some(config) = change.before.as_ref().and_then(|doc| doc.payload()) else {
            let reason = change
                .detail
                .clone()
                .unwrap_or_else(|| "remote configuration unavailable".to_owned());
            warn!(job = name, %reason, "cannot import");
            report.failed.push(ImportFailure {
                job_name: name.to_owned(),
                reason,
            });
            continue;
        };

        let file_name = config_file_name(name);
        let path = definitions_dir.join(&file_name);
        match write_new(&path, config) {
            Ok(()) => {
                entries.push_str(&raw_entry(name, &file_name));
                info!(job = name, file = %path.display(), "imported");
                report.imported.push(ImportedJob {
                    job_name: name.to_owned(),
                    file: path,
                });
            }
            Err(err) => {
                let reason = if err.kind() == io::ErrorKind::AlreadyExists {
                    format!("{} already exists", path.display())
                } else {
                    format!("cannot write {}: {err}", path.display())
                };
                warn!(job = name, %reason, "cannot import");
                report.failed.push(ImportFailure {
                    job_name: name.to_owned(),
                    reason,
                });
            }
        }
    }

    if !entries.is_empty() {
        append_entries(&definitions_dir.join(RAW_JOBS_FILE), &entries)?;
    }
    Ok(report)
}

fn write_new(path: &Path, contents: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(contents.as_bytes())
}

/// Quote a scalar for YAML; JSON strings are valid double-quoted YAML.
fn quoted(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""))
}

fn raw_entry(job_name: &str, file_name: &str) -> String {
    format!(
        "- job:\n    name: {}\n    project-type: raw\n    raw: !include-raw: {}\n",
        quoted(job_name),
        quoted(file_name)
    )
}

fn append_entries(path: &Path, entries: &str) -> Result<(), ReconcileError> {
    let io_err = |source| ReconcileError::Io {
        path: path.to_path_buf(),
        source,
    };
    let existing = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(io_err(err)),
    };

    let mut text = existing;
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(entries);
    fs::write(path, text).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::model::{JobDocument, JobState};
    use crate::render::{DefinitionRenderer, RenderRequest, RenderedJob, render_desired};

    struct NoManaged;

    impl DefinitionRenderer for NoManaged {
        fn render(&self, _: &RenderRequest<'_>) -> Result<Vec<RenderedJob>, ReconcileError> {
            Ok(Vec::new())
        }
    }

    fn remote(jobs: &[JobDocument]) -> JobState {
        jobs.iter().cloned().collect()
    }

    #[test]
    fn imported_jobs_render_back_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let actual = remote(&[
            JobDocument::raw("team/build", "<?xml version='1.1'?>\n<project>\n  <a/>\n</project>"),
            JobDocument::raw("deploy", "<project/>"),
        ]);

        let report = import_missing(&diff(&JobState::new(), &actual), dir.path()).unwrap();
        assert!(report.all_succeeded());
        assert_eq!(report.imported.len(), 2);
        assert!(dir.path().join("team_build.xml").exists());

        let desired = render_desired(dir.path(), &NoManaged).unwrap();
        assert!(!diff(&desired, &actual).has_changes());
    }

    #[test]
    fn existing_entries_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.xml"), "<old/>").unwrap();
        fs::write(
            dir.path().join(RAW_JOBS_FILE),
            "- job:\n    name: old\n    project-type: raw\n    raw: !include-raw: old.xml",
        )
        .unwrap();
        let actual = remote(&[JobDocument::raw("old", "<old/>"), JobDocument::raw("new", "<new/>")]);
        let desired = render_desired(dir.path(), &NoManaged).unwrap();

        let report = import_missing(&diff(&desired, &actual), dir.path()).unwrap();

        assert_eq!(report.imported.len(), 1);
        let desired = render_desired(dir.path(), &NoManaged).unwrap();
        assert_eq!(desired.names().collect::<Vec<_>>(), vec!["new", "old"]);
    }

    #[test]
    fn existing_config_file_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.xml"), "<mine/>").unwrap();
        let actual = remote(&[JobDocument::raw("a", "<theirs/>")]);

        let report = import_missing(&diff(&JobState::new(), &actual), dir.path()).unwrap();

        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].reason.contains("already exists"));
        assert_eq!(fs::read_to_string(dir.path().join("a.xml")).unwrap(), "<mine/>");
        assert!(!dir.path().join(RAW_JOBS_FILE).exists());
    }

    #[test]
    fn degraded_remote_job_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let actual = remote(&[JobDocument::unknown("broken", "HTTP 500"), JobDocument::raw("ok", "<ok/>")]);

        let report = import_missing(&diff(&JobState::new(), &actual), dir.path()).unwrap();

        assert!(!report.all_succeeded());
        assert_eq!(report.failed[0].job_name, "broken");
        assert!(report.failed[0].reason.contains("HTTP 500"));
        assert_eq!(report.imported[0].job_name, "ok");
    }

    #[test]
    fn names_are_quoted_in_yaml() {
        let entry = raw_entry("odd: name", "odd: name.xml");
        let parsed: serde_yaml::Value = serde_yaml::from_str(&entry).unwrap();
        let job = &parsed[0]["job"];
        assert_eq!(job["name"].as_str(), Some("odd: name"));
    }
}
