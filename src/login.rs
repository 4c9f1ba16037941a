//! `jjm login`

use std::io::{self, Write};

use anyhow::{Context, Result};
use jjm_jenkins::{Credentials, JenkinsClient, JobServer, ServerError};

use crate::credentials::{CredentialStore, FileCredentialStore};
use crate::format::{failure, stdout_color, success};
use crate::prompt;
use crate::session::Session;
use crate::CommandStatus;

/// Prompt for credentials, verify them and store them.
///
/// # Errors
/// Returns an error if no URL is configured, prompting fails, or the server
/// cannot be reached.
pub fn run(session: &Session) -> Result<CommandStatus> {
    let url = session.server_url()?;
    let store = FileCredentialStore::standard()?;
    let color = stdout_color();
    let mut out = io::stdout().lock();

    if let Some(existing) = store.lookup(&url)? {
        writeln!(out, "{}", failure("Credentials already stored for this server!", color))?;
        writeln!(out, "  user: {}", existing.username)?;
        out.flush()?;
        if !prompt::confirm("Overwrite?")? {
            return Ok(CommandStatus::Success);
        }
    }

    writeln!(out, "{}", success("Configuring login for:", color))?;
    writeln!(out, "  {url}\n")?;
    writeln!(
        out,
        "Enter your username. If unsure, visit {url}/whoAmI/ (if it says anonymous, log in there first)."
    )?;
    out.flush()?;
    let username = prompt::line("username")?;

    writeln!(out, "\nEnter an API token. Create one at {url}/user/{username}/configure")?;
    out.flush()?;
    let password = prompt::secret("api token")?;

    let credentials = Credentials::new(username, password);
    let client = JenkinsClient::new(session.client_config(Some(credentials.clone()))?)
        .with_context(|| format!("Cannot connect to {url}"))?;
    save_if_valid(&client, &store, &url, &credentials, &mut out, color)
}

/// Store `credentials` for `url` if `server` accepts them.
///
/// # Errors
/// Returns an error if the server fails for a reason other than rejected
/// credentials, or the store cannot be written.
pub fn save_if_valid(
    server: &dyn JobServer,
    store: &dyn CredentialStore,
    url: &str,
    credentials: &Credentials,
    out: &mut dyn Write,
    color: bool,
) -> Result<CommandStatus> {
    match server.whoami() {
        Ok(user) => {
            let path = store.store(url, credentials)?;
            let line = format!("Authenticated as {user}. Saved to {}", path.display());
            writeln!(out, "{}", success(&line, color))?;
            Ok(CommandStatus::Success)
        }
        Err(ServerError::Unauthorized { .. }) => {
            writeln!(out, "{}", failure("Bad authentication, try again.", color))?;
            Ok(CommandStatus::Failed)
        }
        Err(e) => Err(e).with_context(|| format!("Could not verify credentials against {url}")),
    }
}
