//! In-memory [`JobServer`] used as a test double and for dry runs.
//!
//! Jobs live in a sorted map. Every mutation is appended to a call log so
//! tests can assert exactly which remote calls an operation issued, and
//! individual operations can be made to fail per job name.
//!
//! Folders behave like Jenkins: a job can only be created inside a folder
//! that exists, and deleting a folder deletes everything under it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::ServerError;
use crate::server::{JobServer, JobSummary};

/// A remote mutation recorded by [`MemoryServer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    /// `create_job(name, ..)`
    Create(String),
    /// `update_job(name, ..)`
    Update(String),
    /// `delete_job(name)`
    Delete(String),
}

impl Call {
    /// The job the call targeted.
    #[must_use]
    pub fn job(&self) -> &str {
        match self {
            Self::Create(name) | Self::Update(name) | Self::Delete(name) => name,
        }
    }
}

#[derive(Default)]
struct State {
    jobs: BTreeMap<String, Job>,
    calls: Vec<Call>,
    unavailable: bool,
    failing_reads: BTreeSet<String>,
    failing_writes: BTreeSet<String>,
}

#[derive(Clone)]
struct Job {
    class: Option<String>,
    config: String,
}

/// Thread-safe in-memory Jenkins.
#[derive(Default)]
pub struct MemoryServer {
    state: Mutex<State>,
}

impl MemoryServer {
    /// An empty server.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A server pre-populated with `(name, config)` pairs.
    pub fn with_jobs<'a>(jobs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let server = Self::new();
        for (name, config) in jobs {
            server.insert(name, None, config);
        }
        server
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a job directly, bypassing the call log.
    pub fn insert(&self, name: &str, class: Option<&str>, config: &str) {
        self.lock().jobs.insert(
            name.to_owned(),
            Job {
                class: class.map(str::to_owned),
                config: config.to_owned(),
            },
        );
    }

    /// Make every call fail as if the server were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Make `get_job_config(name)` fail.
    pub fn fail_reads_of(&self, name: &str) {
        self.lock().failing_reads.insert(name.to_owned());
    }

    /// Make create/update/delete of `name` fail.
    pub fn fail_writes_to(&self, name: &str) {
        self.lock().failing_writes.insert(name.to_owned());
    }

    /// Current config of `name`, if it exists.
    #[must_use]
    pub fn config_of(&self, name: &str) -> Option<String> {
        self.lock().jobs.get(name).map(|job| job.config.clone())
    }

    /// Names of all stored jobs, sorted.
    #[must_use]
    pub fn job_names(&self) -> Vec<String> {
        self.lock().jobs.keys().cloned().collect()
    }

    /// Every mutation issued so far, in the order the server received them.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    fn check_available(state: &State) -> Result<(), ServerError> {
        if state.unavailable {
            return Err(ServerError::Transport {
                url: "memory://".to_owned(),
                message: "connection refused".to_owned(),
            });
        }
        Ok(())
    }

    fn check_writable(state: &State, name: &str) -> Result<(), ServerError> {
        Self::check_available(state)?;
        if state.failing_writes.contains(name) {
            return Err(ServerError::Rejected {
                message: format!("write to `{name}` rejected"),
            });
        }
        Ok(())
    }
}

impl JobServer for MemoryServer {
    fn whoami(&self) -> Result<String, ServerError> {
        Self::check_available(&self.lock())?;
        Ok("memory".to_owned())
    }

    fn list_jobs(&self) -> Result<Vec<JobSummary>, ServerError> {
        let state = self.lock();
        Self::check_available(&state)?;
        Ok(state
            .jobs
            .iter()
            .map(|(name, job)| JobSummary::new(name.clone(), job.class.as_deref()))
            .collect())
    }

    fn get_job_config(&self, name: &str) -> Result<String, ServerError> {
        let state = self.lock();
        Self::check_available(&state)?;
        if state.failing_reads.contains(name) {
            return Err(ServerError::Http {
                url: format!("memory://job/{name}/config.xml"),
                status: 500,
                body: "read failed".to_owned(),
            });
        }
        state
            .jobs
            .get(name)
            .map(|job| job.config.clone())
            .ok_or_else(|| ServerError::NotFound {
                name: name.to_owned(),
            })
    }

    fn create_job(&self, name: &str, config: &str) -> Result<(), ServerError> {
        let mut state = self.lock();
        state.calls.push(Call::Create(name.to_owned()));
        Self::check_writable(&state, name)?;
        if let Some((parent, _)) = name.rsplit_once('/')
            && !state.jobs.contains_key(parent)
        {
            return Err(ServerError::NotFound {
                name: parent.to_owned(),
            });
        }
        if state.jobs.contains_key(name) {
            return Err(ServerError::Http {
                url: format!("memory://createItem?name={name}"),
                status: 400,
                body: format!("A job already exists with the name '{name}'"),
            });
        }
        state.jobs.insert(
            name.to_owned(),
            Job {
                class: None,
                config: config.to_owned(),
            },
        );
        Ok(())
    }

    fn update_job(&self, name: &str, config: &str) -> Result<(), ServerError> {
        let mut state = self.lock();
        state.calls.push(Call::Update(name.to_owned()));
        Self::check_writable(&state, name)?;
        match state.jobs.get_mut(name) {
            Some(job) => {
                config.clone_into(&mut job.config);
                Ok(())
            }
            None => Err(ServerError::NotFound {
                name: name.to_owned(),
            }),
        }
    }

    fn delete_job(&self, name: &str) -> Result<(), ServerError> {
        let mut state = self.lock();
        state.calls.push(Call::Delete(name.to_owned()));
        Self::check_writable(&state, name)?;
        if state.jobs.remove(name).is_none() {
            return Err(ServerError::NotFound {
                name: name.to_owned(),
            });
        }
        let prefix = format!("{name}/");
        state.jobs.retain(|job, _| !job.starts_with(&prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_read_back() {
        let server = MemoryServer::new();
        server.create_job("a", "<project/>").unwrap();
        assert_eq!(server.get_job_config("a").unwrap(), "<project/>");
        assert_eq!(server.calls(), vec![Call::Create("a".into())]);
    }

    #[test]
    fn create_existing_job_fails() {
        let server = MemoryServer::with_jobs([("a", "<project/>")]);
        let err = server.create_job("a", "<project/>").unwrap_err();
        assert!(matches!(err, ServerError::Http { status: 400, .. }));
    }

    #[test]
    fn injected_failures_are_scoped_to_one_job() {
        let server = MemoryServer::with_jobs([("a", "<a/>"), ("b", "<b/>")]);
        server.fail_reads_of("a");
        server.fail_writes_to("b");
        assert!(server.get_job_config("a").is_err());
        assert!(server.get_job_config("b").is_ok());
        assert!(server.update_job("a", "<a2/>").is_ok());
        assert!(server.delete_job("b").is_err());
        assert_eq!(server.job_names(), vec!["a", "b"]);
    }

    #[test]
    fn create_needs_existing_parent_folder() {
        let server = MemoryServer::new();
        let err = server.create_job("team/build", "<project/>").unwrap_err();
        assert!(matches!(err, ServerError::NotFound { ref name } if name == "team"));

        server.create_job("team", "<folder/>").unwrap();
        server.create_job("team/build", "<project/>").unwrap();
        assert_eq!(server.job_names(), vec!["team", "team/build"]);
    }

    #[test]
    fn deleting_a_folder_removes_its_children() {
        let server = MemoryServer::with_jobs([
            ("team", "<folder/>"),
            ("team/build", "<project/>"),
            ("team/build/nightly", "<project/>"),
            ("teamcity", "<project/>"),
        ]);
        server.delete_job("team").unwrap();
        assert_eq!(server.job_names(), vec!["teamcity"]);

        let err = server.delete_job("team/build").unwrap_err();
        assert!(matches!(err, ServerError::NotFound { .. }));
    }

    #[test]
    fn unavailable_server_fails_listing() {
        let server = MemoryServer::with_jobs([("a", "<a/>")]);
        server.set_unavailable(true);
        let err = server.list_jobs().unwrap_err();
        assert!(err.is_retryable());
    }
}
