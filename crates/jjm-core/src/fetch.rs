//! Server state fetcher: server listing → actual state.
//!
//! A failed listing aborts the run. Once the listing succeeded, a job whose
//! config cannot be read degrades to a [`JobDocument::unknown`] entry and the
//! fetch carries on with its siblings.

use std::collections::BTreeSet;

use jjm_jenkins::{JobServer, JobSummary};
use tracing::{debug, instrument, warn};

use crate::error::ReconcileError;
use crate::filter::NameFilter;
use crate::model::{ActualState, JobDocument, ancestors};
use crate::pool::run_indexed;

/// Folder class whose children are generated by Jenkins itself.
pub const ORGANIZATION_FOLDER: &str = "jenkins.branch.OrganizationFolder";

/// Fetch tuning.
#[derive(Clone, Debug)]
pub struct FetchOptions {
    /// Maximum config reads in flight.
    pub concurrency: usize,
    /// Folder classes whose descendants are skipped.
    pub ignore_children_of: Vec<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            ignore_children_of: vec![ORGANIZATION_FOLDER.to_owned()],
        }
    }
}

/// Read the actual state of every job selected by `filter`.
///
/// # Errors
/// Returns [`ReconcileError::ServerUnavailable`] if the job listing fails.
#[instrument(skip_all, fields(concurrency = options.concurrency))]
pub fn fetch_actual(
    server: &dyn JobServer,
    options: &FetchOptions,
    filter: &NameFilter,
) -> Result<ActualState, ReconcileError> {
    let listing = server
        .list_jobs()
        .map_err(|cause| ReconcileError::ServerUnavailable { cause })?;
    let jobs = select_jobs(listing, &options.ignore_children_of, filter);
    debug!(jobs = jobs.len(), "listed jobs");

    let fetched = run_indexed(&jobs, options.concurrency, None, |job| {
        match server.get_job_config(&job.name) {
            Ok(config) => JobDocument::raw(job.name.clone(), config),
            Err(err) => {
                warn!(job = %job.name, error = %err, "could not read job config");
                JobDocument::unknown(job.name.clone(), err.to_string())
            }
        }
    });

    Ok(fetched.into_iter().flatten().collect())
}

/// Drop descendants of Jenkins-managed folders and names outside `filter`.
///
/// The managing folders themselves are kept.
#[must_use]
pub fn select_jobs(listing: Vec<JobSummary>, ignore_children_of: &[String], filter: &NameFilter) -> Vec<JobSummary> {
    let managed_folders: BTreeSet<String> = listing
        .iter()
        .filter(|job| {
            job.class
                .as_deref()
                .is_some_and(|class| ignore_children_of.iter().any(|c| c == class))
        })
        .map(|job| job.name.clone())
        .collect();

    listing
        .into_iter()
        .filter(|job| !has_managed_ancestor(&job.name, &managed_folders))
        .filter(|job| filter.matches(&job.name))
        .collect()
}

fn has_managed_ancestor(name: &str, managed_folders: &BTreeSet<String>) -> bool {
    ancestors(name).any(|folder| managed_folders.contains(folder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JobKind;
    use jjm_jenkins::MemoryServer;

    fn summaries(entries: &[(&str, Option<&str>)]) -> Vec<JobSummary> {
        entries.iter().map(|(n, c)| JobSummary::new(*n, *c)).collect()
    }

    #[test]
    fn organization_folder_children_are_skipped() {
        let listing = summaries(&[
            ("org", Some(ORGANIZATION_FOLDER)),
            ("org/repo", Some("WorkflowMultiBranchProject")),
            ("org/repo/main", Some("WorkflowJob")),
            ("organic", Some("FreeStyleProject")),
            ("team", Some("com.cloudbees.hudson.plugins.folder.Folder")),
            ("team/build", Some("FreeStyleProject")),
        ]);
        let kept = select_jobs(listing, &[ORGANIZATION_FOLDER.to_owned()], &NameFilter::all());
        let names: Vec<_> = kept.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["org", "organic", "team", "team/build"]);
    }

    #[test]
    fn filter_restricts_listing() {
        let listing = summaries(&[("api-build", None), ("api-test", None), ("web", None)]);
        let filter = NameFilter::new(["api-*"]).unwrap();
        let kept = select_jobs(listing, &[], &filter);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn unreadable_job_degrades_without_aborting() {
        let server = MemoryServer::with_jobs([("a", "<a/>"), ("b", "<b/>"), ("c", "<c/>")]);
        server.fail_reads_of("b");

        let actual = fetch_actual(&server, &FetchOptions::default(), &NameFilter::all()).unwrap();

        assert_eq!(actual.len(), 3);
        assert_eq!(actual.get("a").unwrap().kind(), JobKind::Raw);
        let b = actual.get("b").unwrap();
        assert!(b.is_degraded());
        assert!(b.degraded_reason().unwrap().contains("500"));
    }

    #[test]
    fn listing_failure_is_fatal() {
        let server = MemoryServer::with_jobs([("a", "<a/>")]);
        server.set_unavailable(true);
        let err = fetch_actual(&server, &FetchOptions::default(), &NameFilter::all()).unwrap_err();
        assert!(matches!(err, ReconcileError::ServerUnavailable { .. }));
    }

    #[test]
    fn sequential_and_parallel_fetch_agree() {
        let jobs: Vec<(String, String)> = (0..20).map(|i| (format!("job-{i:02}"), format!("<p n='{i}'/>"))).collect();
        let server = MemoryServer::with_jobs(jobs.iter().map(|(n, c)| (n.as_str(), c.as_str())));

        let sequential = FetchOptions {
            concurrency: 1,
            ..FetchOptions::default()
        };
        let parallel = FetchOptions {
            concurrency: 8,
            ..FetchOptions::default()
        };
        let a = fetch_actual(&server, &sequential, &NameFilter::all()).unwrap();
        let b = fetch_actual(&server, &parallel, &NameFilter::all()).unwrap();
        assert_eq!(a, b);
    }
}
