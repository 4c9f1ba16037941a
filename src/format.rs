//! Output formats and terminal styling.

use std::io::{IsTerminal as _, Write};
use std::str::FromStr;

use anyhow::{Result, bail};
use crossterm::style::Stylize as _;
use jjm_core::{ChangeCounts, ChangeKind, Changeset};
use serde::Serialize;

/// Output format for structured data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plan text, coloured on a terminal
    #[default]
    Text,
    /// JSON - machine-parseable
    Json,
    /// YAML - same shape as JSON
    Yaml,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => bail!("Invalid format '{s}'. Use: text, json or yaml"),
        }
    }
}

impl OutputFormat {
    /// Serialize data to the requested format
    pub fn serialize<T: Serialize>(self, data: &T) -> Result<String> {
        match self {
            Self::Json => {
                serde_json::to_string_pretty(data).map_err(|e| anyhow::anyhow!("JSON serialization failed: {e}"))
            }
            Self::Yaml => {
                serde_yaml::to_string(data).map_err(|e| anyhow::anyhow!("YAML serialization failed: {e}"))
            }
            Self::Text => bail!("Text format should not use serialize()"),
        }
    }
}

// ---------------------------------------------------------------------------
// Plan JSON / YAML
// ---------------------------------------------------------------------------

/// Serialized shape of a plan.
#[derive(Debug, Serialize)]
pub struct PlanView<'a> {
    /// Every change, Unchanged included, in name order.
    pub changes: Vec<ChangeView<'a>>,
    /// Per-kind tallies.
    pub counts: ChangeCounts,
}

/// Serialized shape of one change.
#[derive(Debug, Serialize)]
pub struct ChangeView<'a> {
    pub job_name: &'a str,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<&'a str>,
    pub before_hash: Option<&'a str>,
    pub after_hash: Option<&'a str>,
}

impl<'a> PlanView<'a> {
    /// Borrow a view of `changeset`.
    #[must_use]
    pub fn new(changeset: &'a Changeset) -> Self {
        let changes = changeset
            .iter()
            .map(|change| ChangeView {
                job_name: &change.job_name,
                kind: change.kind,
                detail: change.detail.as_deref(),
                before_hash: change.before.as_ref().and_then(|d| d.hash()).map(|h| h.as_str()),
                after_hash: change.after.as_ref().and_then(|d| d.hash()).map(|h| h.as_str()),
            })
            .collect();
        Self {
            changes,
            counts: changeset.counts(),
        }
    }
}

// ---------------------------------------------------------------------------
// Colour
// ---------------------------------------------------------------------------

/// Whether stdout should get ANSI colour (a terminal, and `NO_COLOR` unset).
#[must_use]
pub fn stdout_color() -> bool {
    std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal()
}

/// Colour plan text line by line: additions green, removals red, updates
/// yellow, hunk headers cyan.
#[must_use]
pub fn colorize(text: &str, color: bool) -> String {
    if !color {
        return text.to_owned();
    }
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    for line in text.split_inclusive('\n') {
        let (body, newline) = line.strip_suffix('\n').map_or((line, ""), |body| (body, "\n"));
        let styled = if body.starts_with("+++") || body.starts_with("---") {
            body.bold().to_string()
        } else if body.starts_with("@@") {
            body.cyan().to_string()
        } else if body.starts_with('+') {
            body.green().to_string()
        } else if body.starts_with('-') {
            body.red().to_string()
        } else if body.starts_with('~') || body.starts_with("  !") {
            body.yellow().to_string()
        } else {
            body.to_owned()
        };
        out.push_str(&styled);
        out.push_str(newline);
    }
    out
}

/// `text` in green when `color` is set.
#[must_use]
pub fn success(text: &str, color: bool) -> String {
    if color { text.green().to_string() } else { text.to_owned() }
}

/// Print description metadata violations under a red heading.
///
/// # Errors
/// Returns an error if `out` fails.
pub fn write_metadata_problems<'a>(
    out: &mut dyn Write,
    problems: impl IntoIterator<Item = (&'a str, &'a str)>,
    color: bool,
) -> Result<()> {
    writeln!(out, "{}", failure("Metadata validation errors", color))?;
    for (job_name, message) in problems {
        writeln!(out, "  job `{job_name}`: {message}")?;
    }
    Ok(())
}

/// `text` in red when `color` is set.
#[must_use]
pub fn failure(text: &str, color: bool) -> String {
    if color { text.red().to_string() } else { text.to_owned() }
}
