//! Project configuration (`jjm.toml`).
//!
//! Defines the typed configuration for `jjm.toml` in the working directory:
//! which Jenkins server to talk to, how hard to push it, where the job
//! definitions live and what description metadata each job must carry.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use jjm_core::MetadataRules;
use serde::Deserialize;

/// File name looked up in the working directory.
pub const CONFIG_FILE: &str = "jjm.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level project configuration.
///
/// Missing fields use defaults. Missing file → all defaults (no error).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Server connection settings.
    #[serde(default)]
    pub jenkins: JenkinsConfig,

    /// Job definition settings.
    #[serde(default)]
    pub definitions: DefinitionsConfig,

    /// Description metadata rules (`[metadata]`).
    #[serde(default)]
    pub metadata: MetadataRules,
}

// ---------------------------------------------------------------------------
// JenkinsConfig
// ---------------------------------------------------------------------------

/// `[jenkins]`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JenkinsConfig {
    /// Server base URL. Required unless `--url` is given.
    #[serde(default)]
    pub url: Option<String>,

    /// Per-request timeout in seconds (default: 60).
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Maximum concurrent job reads/writes (default: 4).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Retries for transient HTTP failures (default: 2).
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: default_timeout(),
            concurrency: default_concurrency(),
            retries: default_retries(),
        }
    }
}

impl JenkinsConfig {
    /// The request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

const fn default_timeout() -> u64 {
    60
}

const fn default_concurrency() -> usize {
    4
}

const fn default_retries() -> u32 {
    2
}

// ---------------------------------------------------------------------------
// DefinitionsConfig
// ---------------------------------------------------------------------------

/// `[definitions]`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefinitionsConfig {
    /// Directory holding the YAML definitions, relative to the working
    /// directory (default: `"."`).
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Renderer executable (default: `"jenkins-jobs"`).
    #[serde(default = "default_renderer")]
    pub renderer: String,

    /// Folder classes whose children Jenkins manages itself.
    #[serde(default = "default_ignore_children_of")]
    pub ignore_children_of: Vec<String>,
}

impl Default for DefinitionsConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            renderer: default_renderer(),
            ignore_children_of: default_ignore_children_of(),
        }
    }
}

fn default_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_renderer() -> String {
    "jenkins-jobs".to_owned()
}

fn default_ignore_children_of() -> Vec<String> {
    vec![jjm_core::ORGANIZATION_FOLDER.to_owned()]
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading `jjm.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl ProjectConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML or unknown fields,
    ///   returns a [`ConfigError`] with line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start].chars().filter(|&c| c == '\n').count() + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError { path: None, message }
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError {
                path: None,
                message: message.to_owned(),
            })
        };
        if self.jenkins.concurrency == 0 {
            return invalid("jenkins.concurrency must be at least 1");
        }
        if self.jenkins.timeout == 0 {
            return invalid("jenkins.timeout must be at least 1 second");
        }
        if self.definitions.renderer.trim().is_empty() {
            return invalid("definitions.renderer must not be empty");
        }
        Ok(())
    }

    /// The server URL: `override_url` if given, else `jenkins.url`, with any
    /// trailing `/` trimmed. `None` if neither is set.
    #[must_use]
    pub fn server_url(&self, override_url: Option<&str>) -> Option<String> {
        override_url
            .or(self.jenkins.url.as_deref())
            .map(|url| url.trim().trim_end_matches('/').to_owned())
            .filter(|url| !url.is_empty())
    }

    /// The definitions directory resolved against `working_dir`.
    #[must_use]
    pub fn definitions_dir(&self, working_dir: &Path) -> PathBuf {
        working_dir.join(&self.definitions.path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
