//! Per-invocation context: working directory, project config, server access.
//!
//! Everything a command needs is resolved here once and passed down
//! explicitly. Paths are resolved against the working directory instead of
//! changing the process's current directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use jjm_core::{FetchOptions, JobBuilderRenderer, NameFilter, ReconcileOptions};
use jjm_jenkins::{ClientConfig, Credentials, JenkinsClient, RetryPolicy};
use tracing::{debug, warn};

use crate::cli::{GlobalArgs, TargetArgs};
use crate::config::{CONFIG_FILE, ProjectConfig};
use crate::credentials::{self, CredentialStore};

/// Resolved context for one command.
#[derive(Debug, Clone)]
pub struct Session {
    working_dir: PathBuf,
    config: ProjectConfig,
    url_override: Option<String>,
}

impl Session {
    /// Resolve the working directory and load `jjm.toml` from it.
    ///
    /// # Errors
    /// Returns an error if the working directory does not exist or the
    /// config file is invalid.
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let working_dir = match &global.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Could not determine the current directory")?,
        };
        if !working_dir.is_dir() {
            bail!("Working directory {} does not exist", working_dir.display());
        }
        let config = ProjectConfig::load(&working_dir.join(CONFIG_FILE))?;
        debug!(dir = %working_dir.display(), ?config, "session opened");
        Ok(Self::new(working_dir, config, global.url.clone()))
    }

    /// A session from already-resolved parts.
    #[must_use]
    pub const fn new(working_dir: PathBuf, config: ProjectConfig, url_override: Option<String>) -> Self {
        Self {
            working_dir,
            config,
            url_override,
        }
    }

    /// The working directory.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// The loaded project config.
    #[must_use]
    pub const fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Where the job definitions live.
    #[must_use]
    pub fn definitions_dir(&self) -> PathBuf {
        self.config.definitions_dir(&self.working_dir)
    }

    /// The configured definition renderer. A renderer given as a relative
    /// path (`bin/jenkins-jobs`) is resolved against the working directory;
    /// a bare name is looked up on `PATH`.
    #[must_use]
    pub fn renderer(&self) -> JobBuilderRenderer {
        let program = Path::new(&self.config.definitions.renderer);
        if program.is_relative() && program.components().count() > 1 {
            JobBuilderRenderer::new(self.working_dir.join(program))
        } else {
            JobBuilderRenderer::new(program)
        }
    }

    /// The server URL.
    ///
    /// # Errors
    /// Returns an error explaining how to configure one if none is set.
    pub fn server_url(&self) -> Result<String> {
        match self.config.server_url(self.url_override.as_deref()) {
            Some(url) => Ok(url),
            None => bail!(
                "No Jenkins URL configured.\n\
                 Create {} with contents:\n\n\
                 [jenkins]\n\
                 url = \"https://jenkins.example.com\"\n\n\
                 or pass --url.",
                self.working_dir.join(CONFIG_FILE).display()
            ),
        }
    }

    /// Client settings for the server with explicit `credentials`.
    ///
    /// # Errors
    /// Returns an error if no server URL is configured.
    pub fn client_config(&self, credentials: Option<Credentials>) -> Result<ClientConfig> {
        let jenkins = &self.config.jenkins;
        Ok(ClientConfig {
            url: self.server_url()?,
            credentials,
            timeout: jenkins.timeout(),
            retry: RetryPolicy {
                retries: jenkins.retries,
                ..RetryPolicy::default()
            },
        })
    }

    /// A client for the server using stored credentials.
    ///
    /// # Errors
    /// Returns an error if no URL is configured, the URL is invalid, or the
    /// credential files cannot be read.
    pub fn connect(&self, store: &dyn CredentialStore) -> Result<JenkinsClient> {
        let url = self.server_url()?;
        let credentials = credentials::resolve(store, &url)?;
        if credentials.is_none() {
            warn!(%url, "no credentials stored; connecting anonymously (run `jjm login`)");
        }
        let config = self.client_config(credentials)?;
        JenkinsClient::new(config).with_context(|| format!("Cannot connect to {url}"))
    }

    /// Reconciliation options for this session.
    ///
    /// # Errors
    /// Returns an error for an invalid `--target` glob or a zero concurrency.
    pub fn reconcile_options(&self, target: &TargetArgs, concurrency: Option<usize>) -> Result<ReconcileOptions> {
        let concurrency = concurrency.unwrap_or(self.config.jenkins.concurrency);
        if concurrency == 0 {
            bail!("--concurrency must be at least 1");
        }
        let mut options = ReconcileOptions::new(self.definitions_dir());
        options.filter = name_filter(target)?;
        options.fetch = FetchOptions {
            concurrency,
            ignore_children_of: self.config.definitions.ignore_children_of.clone(),
        };
        options.apply.concurrency = concurrency;
        options.metadata = self.config.metadata.clone();
        Ok(options)
    }
}

/// Compile `--target` globs.
///
/// # Errors
/// Returns an error naming the first invalid pattern.
pub fn name_filter(target: &TargetArgs) -> Result<NameFilter> {
    NameFilter::new(&target.targets).map_err(|e| anyhow::anyhow!("Invalid --target pattern: {e}"))
}
