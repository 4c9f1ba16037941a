//! Per-server credential store.
//!
//! Credentials live in TOML files keyed by server URL:
//!
//! ```toml
//! [servers."https://jenkins.example.com"]
//! username = "alice"
//! password = "<api token>"
//! ```
//!
//! Files are read in order (system-wide, then per-user) and later files win.
//! `JJM_USERNAME` / `JJM_PASSWORD` override both. `login` writes only the
//! per-user file.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use jjm_jenkins::Credentials;
use serde::{Deserialize, Serialize};

/// System-wide credentials file.
pub const SYSTEM_CREDENTIALS: &str = "/etc/jjm/credentials.toml";

/// Environment variable overriding the stored username.
pub const USERNAME_ENV: &str = "JJM_USERNAME";
/// Environment variable overriding the stored password.
pub const PASSWORD_ENV: &str = "JJM_PASSWORD";

/// Where credentials are looked up and saved.
pub trait CredentialStore {
    /// Credentials for `url`, if any are configured.
    ///
    /// # Errors
    /// Returns an error if a credentials file exists but cannot be parsed.
    fn lookup(&self, url: &str) -> Result<Option<Credentials>>;

    /// Save `credentials` for `url`, returning where they were written.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    fn store(&self, url: &str, credentials: &Credentials) -> Result<PathBuf>;
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct CredentialsFile {
    #[serde(default)]
    servers: BTreeMap<String, ServerEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ServerEntry {
    username: String,
    password: String,
}

impl CredentialsFile {
    fn read(path: &Path) -> Result<Option<Self>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        let file = toml::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(file))
    }
}

/// [`CredentialStore`] backed by TOML files.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    read_paths: Vec<PathBuf>,
    write_path: PathBuf,
}

impl FileCredentialStore {
    /// A store reading `read_paths` in order and writing `write_path`.
    #[must_use]
    pub const fn new(read_paths: Vec<PathBuf>, write_path: PathBuf) -> Self {
        Self { read_paths, write_path }
    }

    /// The standard locations: [`SYSTEM_CREDENTIALS`], then
    /// `<user config dir>/jjm/credentials.toml`.
    ///
    /// # Errors
    /// Returns an error if the user config directory cannot be determined.
    pub fn standard() -> Result<Self> {
        let user = dirs::config_dir()
            .context("Could not determine the user config directory")?
            .join("jjm")
            .join("credentials.toml");
        Ok(Self::new(vec![PathBuf::from(SYSTEM_CREDENTIALS), user.clone()], user))
    }

    /// The file `store` writes to.
    #[must_use]
    pub fn write_path(&self) -> &Path {
        &self.write_path
    }
}

impl CredentialStore for FileCredentialStore {
    fn lookup(&self, url: &str) -> Result<Option<Credentials>> {
        let mut found = None;
        for path in &self.read_paths {
            if let Some(file) = CredentialsFile::read(path)?
                && let Some(entry) = file.servers.get(url)
            {
                found = Some(Credentials::new(&entry.username, &entry.password));
            }
        }
        Ok(found)
    }

    fn store(&self, url: &str, credentials: &Credentials) -> Result<PathBuf> {
        let path = &self.write_path;
        let mut file = CredentialsFile::read(path)?.unwrap_or_default();
        file.servers.insert(
            url.to_owned(),
            ServerEntry {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
            },
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let text = toml::to_string(&file).context("Failed to serialize credentials")?;
        write_private(path, &text).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path.clone())
    }
}

/// Write `text` to a file only the owner can read. A new file is created
/// with mode 0600; an existing one is narrowed to 0600 before the secret is
/// written.
fn write_private(path: &Path, text: &str) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};
        options.mode(0o600);
        let file = options.open(path)?;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        write_all(file, text)
    }
    #[cfg(not(unix))]
    {
        write_all(options.open(path)?, text)
    }
}

fn write_all(mut file: File, text: &str) -> std::io::Result<()> {
    file.write_all(text.as_bytes())?;
    file.sync_all()
}

/// Credentials from the environment, if both variables are set.
#[must_use]
pub fn from_env() -> Option<Credentials> {
    from_lookup(|key| std::env::var(key).ok())
}

fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Option<Credentials> {
    match (get(USERNAME_ENV), get(PASSWORD_ENV)) {
        (Some(username), Some(password)) if !username.is_empty() => Some(Credentials::new(username, password)),
        _ => None,
    }
}

/// Credentials for `url`: environment first, then `store`.
///
/// # Errors
/// Returns an error if the store cannot be read.
pub fn resolve(store: &dyn CredentialStore, url: &str) -> Result<Option<Credentials>> {
    if let Some(credentials) = from_env() {
        return Ok(Some(credentials));
    }
    store.lookup(url)
}
