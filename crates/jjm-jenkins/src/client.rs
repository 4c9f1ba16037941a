//! Blocking HTTP client for the Jenkins job API.
//!
//! | Operation        | Request                                         |
//! |------------------|-------------------------------------------------|
//! | `whoami`         | `GET  <base>/me/api/json`                       |
//! | `list_jobs`      | `GET  <folder>/api/json?tree=jobs[...]`         |
//! | `get_job_config` | `GET  <base>/job/<a>/job/<b>/config.xml`        |
//! | `create_job`     | `POST <parent>/createItem?name=<leaf>`          |
//! | `update_job`     | `POST <base>/job/<a>/job/<b>/config.xml`        |
//! | `delete_job`     | `POST <base>/job/<a>/job/<b>/doDelete`          |
//! | (CSRF crumb)     | `GET  <base>/crumbIssuer/api/json`              |
//!
//! POSTs carry the CSRF crumb header Jenkins asks for. The crumb is fetched
//! on the first POST and kept for the life of the client; a 404 from the
//! crumb issuer means CSRF protection is off and no header is sent. Cookies
//! are kept so a crumb bound to a session stays valid.
//!
//! Every request goes through [`RetryPolicy::run`]; only errors classified as
//! retryable by [`ServerError::is_retryable`] are repeated. Callers never see
//! retries, only the final outcome.

use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::ServerError;
use crate::server::{JobServer, JobSummary};

/// Response bodies are cut to this many characters in error messages.
const ERROR_BODY_LIMIT: usize = 512;

/// Properties requested from the listing endpoint. `jobs[name]` is only
/// present on folders, which is how folders are told apart from leaf jobs.
const LISTING_TREE: &str = "jobs[name,_class,jobs[name]]";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Username and API token for one server.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Jenkins user id.
    pub username: String,
    /// API token (or password).
    pub password: String,
}

impl Credentials {
    /// Create a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How often and how patiently to repeat retryable failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    /// Base delay; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Run `op`, repeating it while it fails with a retryable error and
    /// attempts remain. The last error is returned unchanged.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, ServerError>,
    ) -> Result<T, ServerError> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    warn!(%what, attempt, error = %err, "retrying after retryable failure");
                    thread::sleep(self.backoff * attempt);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Connection settings for [`JenkinsClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server base URL, e.g. `https://jenkins.example.com`.
    pub url: String,
    /// Credentials; `None` means anonymous access.
    pub credentials: Option<Credentials>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retry behaviour for retryable failures.
    pub retry: RetryPolicy,
}

impl ClientConfig {
    /// Settings for `url` with default timeout and retries, no credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Listing {
    #[serde(default)]
    jobs: Vec<ListedJob>,
}

#[derive(Deserialize)]
struct ListedJob {
    name: String,
    #[serde(rename = "_class")]
    class: Option<String>,
    jobs: Option<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
struct WhoAmI {
    id: String,
}

/// CSRF token from `crumbIssuer/api/json`.
#[derive(Clone, Debug, Deserialize)]
struct Crumb {
    crumb: String,
    /// Header name to send the token in, usually `Jenkins-Crumb`.
    #[serde(rename = "crumbRequestField")]
    field: String,
}

// ---------------------------------------------------------------------------
// JenkinsClient
// ---------------------------------------------------------------------------

/// [`JobServer`] implementation backed by the Jenkins HTTP API.
pub struct JenkinsClient {
    http: Client,
    base: Url,
    credentials: Option<Credentials>,
    retry: RetryPolicy,
    /// `None` until the first POST; then the crumb, or `Some(None)` when
    /// the server issues none.
    crumb: Mutex<Option<Option<Crumb>>>,
}

impl fmt::Debug for JenkinsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JenkinsClient")
            .field("base", &self.base.as_str())
            .field("credentials", &self.credentials)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl JenkinsClient {
    /// Build a client for the server described by `config`.
    ///
    /// # Errors
    /// Returns [`ServerError::InvalidUrl`] if the URL does not parse or is
    /// not an `http(s)` URL, and [`ServerError::Transport`] if the HTTP
    /// client cannot be constructed.
    pub fn new(config: ClientConfig) -> Result<Self, ServerError> {
        let trimmed = config.url.trim_end_matches('/');
        let base = Url::parse(&format!("{trimmed}/")).map_err(|e| ServerError::InvalidUrl {
            value: config.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ServerError::InvalidUrl {
                value: config.url,
                reason: "expected an http or https URL".to_owned(),
            });
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("jjm/", env!("CARGO_PKG_VERSION")))
            .cookie_store(true)
            .build()
            .map_err(|e| ServerError::Transport {
                url: base.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            base,
            credentials: config.credentials,
            retry: config.retry,
            crumb: Mutex::new(None),
        })
    }

    /// The normalized base URL (always ends in `/`).
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base
    }

    /// Build `<base>/job/<seg>/job/<seg>/<tail...>` for a job (or the server
    /// root when `job` is `None`).
    fn endpoint(&self, job: Option<&str>, tail: &[&str]) -> Result<Url, ServerError> {
        if let Some(name) = job {
            validate_job_name(name)?;
        }
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| ServerError::InvalidUrl {
                value: self.base.to_string(),
                reason: "URL cannot be used as a base".to_owned(),
            })?;
            segments.pop_if_empty();
            if let Some(name) = job {
                for part in name.split('/') {
                    segments.push("job").push(part);
                }
            }
            segments.extend(tail);
        }
        Ok(url)
    }

    /// The cached CSRF crumb, fetching it on first use.
    ///
    /// The lock is held across the fetch so concurrent first POSTs share
    /// one request.
    fn crumb(&self) -> Result<Option<Crumb>, ServerError> {
        let mut cached = self.crumb.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(crumb) = cached.as_ref() {
            return Ok(crumb.clone());
        }
        let crumb = self.fetch_crumb()?;
        *cached = Some(crumb.clone());
        Ok(crumb)
    }

    fn fetch_crumb(&self) -> Result<Option<Crumb>, ServerError> {
        let url = self.endpoint(None, &["crumbIssuer", "api", "json"])?;
        match self.get_json::<Crumb>(&url) {
            Ok(crumb) => {
                debug!(field = %crumb.field, "fetched csrf crumb");
                Ok(Some(crumb))
            }
            Err(ServerError::Http { status: 404, .. }) => {
                debug!("crumb issuer disabled");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Send one request (with retries) and map the status to an error.
    fn send(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&str>,
        job: Option<&str>,
    ) -> Result<Response, ServerError> {
        let crumb = if *method == Method::POST { self.crumb()? } else { None };
        self.retry.run(url.as_str(), || {
            debug!(%method, url = %url, "jenkins request");
            let mut request = self.http.request(method.clone(), url.clone());
            if let Some(creds) = &self.credentials {
                request = request.basic_auth(&creds.username, Some(&creds.password));
            }
            if let Some(crumb) = &crumb {
                request = request.header(crumb.field.as_str(), crumb.crumb.as_str());
            }
            if let Some(body) = body {
                request = request
                    .header(CONTENT_TYPE, "application/xml; charset=utf-8")
                    .body(body.to_owned());
            }
            let response = request.send().map_err(|e| ServerError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            check_status(response, url, job)
        })
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &Url) -> Result<T, ServerError> {
        let response = self.send(&Method::GET, url, None, None)?;
        response.json::<T>().map_err(|e| ServerError::InvalidResponse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    fn list_folder(&self, folder: Option<&str>, out: &mut Vec<JobSummary>) -> Result<(), ServerError> {
        let mut url = self.endpoint(folder, &["api", "json"])?;
        url.query_pairs_mut().append_pair("tree", LISTING_TREE);
        let listing: Listing = self.get_json(&url)?;

        for job in listing.jobs {
            let full_name = match folder {
                Some(parent) => format!("{parent}/{}", job.name),
                None => job.name,
            };
            let is_folder = job.jobs.is_some();
            out.push(JobSummary::new(full_name.clone(), job.class.as_deref()));
            if is_folder {
                self.list_folder(Some(&full_name), out)?;
            }
        }
        Ok(())
    }
}

impl JobServer for JenkinsClient {
    #[instrument(skip(self), fields(url = %self.base))]
    fn whoami(&self) -> Result<String, ServerError> {
        let url = self.endpoint(None, &["me", "api", "json"])?;
        let me: WhoAmI = self.get_json(&url)?;
        Ok(me.id)
    }

    #[instrument(skip(self), fields(url = %self.base))]
    fn list_jobs(&self) -> Result<Vec<JobSummary>, ServerError> {
        let mut jobs = Vec::new();
        self.list_folder(None, &mut jobs)?;
        debug!(count = jobs.len(), "listed jobs");
        Ok(jobs)
    }

    fn get_job_config(&self, name: &str) -> Result<String, ServerError> {
        let url = self.endpoint(Some(name), &["config.xml"])?;
        let response = self.send(&Method::GET, &url, None, Some(name))?;
        response.text().map_err(|e| ServerError::InvalidResponse {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    fn create_job(&self, name: &str, config: &str) -> Result<(), ServerError> {
        validate_job_name(name)?;
        let (parent, leaf) = match name.rsplit_once('/') {
            Some((parent, leaf)) => (Some(parent), leaf),
            None => (None, name),
        };
        let mut url = self.endpoint(parent, &["createItem"])?;
        url.query_pairs_mut().append_pair("name", leaf);
        self.send(&Method::POST, &url, Some(config), parent)?;
        Ok(())
    }

    fn update_job(&self, name: &str, config: &str) -> Result<(), ServerError> {
        let url = self.endpoint(Some(name), &["config.xml"])?;
        self.send(&Method::POST, &url, Some(config), Some(name))?;
        Ok(())
    }

    fn delete_job(&self, name: &str) -> Result<(), ServerError> {
        let url = self.endpoint(Some(name), &["doDelete"])?;
        self.send(&Method::POST, &url, None, Some(name))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Reject names that would produce an ambiguous URL path.
fn validate_job_name(name: &str) -> Result<(), ServerError> {
    if name.is_empty() || name.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(ServerError::InvalidUrl {
            value: name.to_owned(),
            reason: "job names must be non-empty `/`-separated segments".to_owned(),
        });
    }
    Ok(())
}

fn check_status(response: Response, url: &Url, job: Option<&str>) -> Result<Response, ServerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match (status, job) {
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => Err(ServerError::Unauthorized {
            url: url.to_string(),
            status: status.as_u16(),
        }),
        (StatusCode::NOT_FOUND, Some(name)) => Err(ServerError::NotFound {
            name: name.to_owned(),
        }),
        _ => {
            let body: String = response
                .text()
                .unwrap_or_default()
                .chars()
                .take(ERROR_BODY_LIMIT)
                .collect();
            Err(ServerError::Http {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            })
        }
    }
}
