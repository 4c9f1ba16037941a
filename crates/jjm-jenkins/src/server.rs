//! The [`JobServer`] trait — the single boundary between jjm and Jenkins.
//!
//! The reconciliation engine talks to the server exclusively through this
//! trait. It is object-safe so callers can hold `&dyn JobServer`, and it
//! requires `Send + Sync` because fetches and mutations are dispatched from
//! a scoped worker pool.
//!
//! | Group   | Methods                                         |
//! |---------|-------------------------------------------------|
//! | Auth    | `whoami`                                        |
//! | Read    | `list_jobs`, `get_job_config`                   |
//! | Mutate  | `create_job`, `update_job`, `delete_job`        |

use crate::error::ServerError;

/// One entry from a server-side job listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobSummary {
    /// Full job name, folder segments joined with `/`.
    pub name: String,
    /// The Jenkins implementation class (`_class`), when reported.
    pub class: Option<String>,
}

impl JobSummary {
    /// Create a summary for `name` with an optional class.
    pub fn new(name: impl Into<String>, class: Option<&str>) -> Self {
        Self {
            name: name.into(),
            class: class.map(str::to_owned),
        }
    }

    /// The folder containing this job, if it is not at the top level.
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.name.rsplit_once('/').map(|(parent, _)| parent)
    }
}

/// Job CRUD against a single Jenkins server.
///
/// Implementations may be backed by the HTTP API ([`JenkinsClient`]) or an
/// in-memory double ([`MemoryServer`]).
///
/// [`JenkinsClient`]: crate::JenkinsClient
/// [`MemoryServer`]: crate::MemoryServer
pub trait JobServer: Send + Sync {
    /// Return the user id the server associates with our credentials.
    ///
    /// Used to verify credentials before they are stored.
    fn whoami(&self) -> Result<String, ServerError>;

    /// List every job on the server, descending into folders.
    ///
    /// Folders appear in the listing themselves, followed by their children.
    fn list_jobs(&self) -> Result<Vec<JobSummary>, ServerError>;

    /// Fetch the `config.xml` of one job.
    fn get_job_config(&self, name: &str) -> Result<String, ServerError>;

    /// Create a new job with the given config.
    fn create_job(&self, name: &str, config: &str) -> Result<(), ServerError>;

    /// Replace the config of an existing job.
    fn update_job(&self, name: &str, config: &str) -> Result<(), ServerError>;

    /// Delete a job.
    fn delete_job(&self, name: &str) -> Result<(), ServerError>;
}
