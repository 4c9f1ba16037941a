//! Description metadata checks.
//!
//! Teams tag jobs with `key: value` lines in the job description:
//!
//! ```text
//! <description>Nightly build
//! owner: platform
//! tier: gold</description>
//! ```
//!
//! [`MetadataRules`] (the `[metadata]` table of `jjm.toml`) says which keys
//! every job must carry and which values a key may take. Violations are
//! reported per job before anything is sent to the server.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::model::DesiredState;
use crate::render::DefinitionProblem;

/// Comment Jenkins Job Builder appends to every description it writes.
const BUILDER_MARKER: &str = "<!-- Managed by Jenkins Job Builder -->";

#[allow(clippy::expect_used)]
static DESCRIPTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<description>(.*?)</description>").expect("constant regex pattern is valid"));

#[allow(clippy::expect_used)]
static ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*([\w-]+):\s*([\w -]+)\s*$").expect("constant regex pattern is valid"));

/// Metadata every job description must satisfy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataRules {
    /// Keys that must be present.
    #[serde(default)]
    pub required: Vec<String>,
    /// Permitted values per key. Keys not listed accept any value.
    #[serde(default)]
    pub allowed: BTreeMap<String, Vec<String>>,
}

impl MetadataRules {
    /// No rules configured; validation is skipped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.allowed.is_empty()
    }

    /// Violations of these rules by `metadata`, required keys first.
    #[must_use]
    pub fn check(&self, metadata: &BTreeMap<String, String>) -> Vec<String> {
        let mut warnings: Vec<String> = self
            .required
            .iter()
            .filter(|key| !metadata.contains_key(key.as_str()))
            .map(|key| format!("missing required metadata `{key}`"))
            .collect();
        for (key, values) in &self.allowed {
            if let Some(value) = metadata.get(key)
                && !values.contains(value)
            {
                warnings.push(format!(
                    "metadata `{key}` is `{value}`, expected one of: {}",
                    values.join(", ")
                ));
            }
        }
        warnings
    }
}

/// The `key: value` lines of a job config's description.
///
/// Keys are word characters and `-`; values are word characters, spaces and
/// `-`. Other lines are ignored, as is the job builder's marker comment.
#[must_use]
pub fn extract_metadata(config: &str) -> BTreeMap<String, String> {
    let Some(description) = DESCRIPTION.captures(config).and_then(|c| c.get(1)) else {
        return BTreeMap::new();
    };
    let text = unescape(description.as_str()).replace(BUILDER_MARKER, "");
    ENTRY
        .captures_iter(&text)
        .map(|c| (c[1].to_owned(), c[2].trim().to_owned()))
        .collect()
}

/// Check every readable document in `desired` against `rules`.
#[must_use]
pub fn validate_metadata(desired: &DesiredState, rules: &MetadataRules) -> Vec<DefinitionProblem> {
    if rules.is_empty() {
        return Vec::new();
    }
    let mut problems = Vec::new();
    for doc in desired.iter() {
        let Some(content) = doc.content() else { continue };
        let metadata = extract_metadata(content);
        if metadata.is_empty() {
            debug!(job = doc.name(), "no description metadata");
        }
        problems.extend(rules.check(&metadata).into_iter().map(|message| DefinitionProblem {
            job_name: doc.name().to_owned(),
            message,
        }));
    }
    problems
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#xd;", "\r")
        .replace("&amp;", "&")
}
