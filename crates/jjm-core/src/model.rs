//! Job document model.
//!
//! A [`JobDocument`] is one job's configuration, desired or actual. Its
//! identity is the name; its value is the [`ContentHash`] of the canonical
//! form of its config. Degraded actual entries (listed by the server but not
//! readable) carry no content at all and never compare equal to anything.
//!
//! [`JobState`] maps job names to documents in name order and is used for
//! both sides of a diff ([`DesiredState`] and [`ActualState`]).

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::fmt::Write as _;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

// ---------------------------------------------------------------------------
// Canonical content
// ---------------------------------------------------------------------------

/// Reduce a config document to the form used for hashing and diffing.
///
/// - a leading byte-order mark and `<?xml ...?>` declaration are dropped
/// - `\r\n` line endings become `\n`
/// - trailing whitespace is stripped from every line
/// - blank lines are removed
/// - the result ends with exactly one newline (or is empty)
///
/// Leading indentation is kept: it can be significant inside embedded
/// scripts, so a change there must surface as an update.
#[must_use]
pub fn canonicalize(content: &str) -> String {
    let body = strip_xml_declaration(content.trim_start_matches('\u{feff}'));
    let mut out = String::with_capacity(body.len() + 1);
    for line in body.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

fn strip_xml_declaration(content: &str) -> &str {
    let trimmed = content.trim_start();
    if trimmed.starts_with("<?xml")
        && let Some(end) = trimmed.find("?>")
    {
        return &trimmed[end + 2..];
    }
    content
}

/// SHA-256 digest (lowercase hex) of canonical content.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash already-canonical text.
    #[must_use]
    pub fn of(canonical: &str) -> Self {
        let digest = Sha256::digest(canonical.as_bytes());
        let mut hex = String::with_capacity(64);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        Self(hex)
    }

    /// The full hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first 12 hex characters, for display.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A config document as supplied, plus its canonical form and hash.
///
/// The original text is what gets sent to the server; the canonical text is
/// what gets compared and shown in previews.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Content {
    original: String,
    canonical: String,
    hash: ContentHash,
}

impl Content {
    /// Canonicalize and hash `original`.
    #[must_use]
    pub fn new(original: impl Into<String>) -> Self {
        let original = original.into();
        let canonical = canonicalize(&original);
        let hash = ContentHash::of(&canonical);
        Self {
            original,
            canonical,
            hash,
        }
    }

    /// The text exactly as supplied.
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    /// The canonical text.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Digest of the canonical text.
    #[must_use]
    pub const fn hash(&self) -> &ContentHash {
        &self.hash
    }
}

// ---------------------------------------------------------------------------
// JobDocument
// ---------------------------------------------------------------------------

/// Where a document came from, and what it holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobBody {
    /// Produced by the definition renderer.
    Managed(Content),
    /// Accepted verbatim: `raw` project-type definitions and every config
    /// read back from the server.
    Raw(Content),
    /// Listed by the server, but its config could not be read.
    Unknown {
        /// Why the config is unavailable.
        reason: String,
    },
}

/// The tag of a [`JobBody`], without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// See [`JobBody::Managed`].
    Managed,
    /// See [`JobBody::Raw`].
    Raw,
    /// See [`JobBody::Unknown`].
    Unknown,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Managed => write!(f, "managed"),
            Self::Raw => write!(f, "raw"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One job's configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobDocument {
    name: String,
    body: JobBody,
}

impl JobDocument {
    /// A document emitted by the definition renderer.
    pub fn managed(name: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: JobBody::Managed(Content::new(config)),
        }
    }

    /// A verbatim document (raw definition or server config).
    pub fn raw(name: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: JobBody::Raw(Content::new(config)),
        }
    }

    /// A degraded entry for a job whose config could not be read.
    pub fn unknown(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: JobBody::Unknown {
                reason: reason.into(),
            },
        }
    }

    /// The job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tagged body.
    #[must_use]
    pub const fn body(&self) -> &JobBody {
        &self.body
    }

    /// The body's tag.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        match self.body {
            JobBody::Managed(_) => JobKind::Managed,
            JobBody::Raw(_) => JobKind::Raw,
            JobBody::Unknown { .. } => JobKind::Unknown,
        }
    }

    const fn content_ref(&self) -> Option<&Content> {
        match &self.body {
            JobBody::Managed(content) | JobBody::Raw(content) => Some(content),
            JobBody::Unknown { .. } => None,
        }
    }

    /// Canonical content, absent for degraded entries.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.content_ref().map(Content::canonical)
    }

    /// The config to send to the server, absent for degraded entries.
    #[must_use]
    pub fn payload(&self) -> Option<&str> {
        self.content_ref().map(Content::original)
    }

    /// Content hash, absent for degraded entries.
    #[must_use]
    pub fn hash(&self) -> Option<&ContentHash> {
        self.content_ref().map(Content::hash)
    }

    /// Whether this is a degraded entry.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self.body, JobBody::Unknown { .. })
    }

    /// Why the config is unavailable, for degraded entries.
    #[must_use]
    pub fn degraded_reason(&self) -> Option<&str> {
        match &self.body {
            JobBody::Unknown { reason } => Some(reason),
            JobBody::Managed(_) | JobBody::Raw(_) => None,
        }
    }

    /// Value equality: both documents have content and their hashes match.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        match (self.hash(), other.hash()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

/// Job name → document, ordered by name (byte-wise).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobState {
    jobs: BTreeMap<String, JobDocument>,
}

/// Jobs computed from local definitions.
pub type DesiredState = JobState;

/// Jobs read from the server.
pub type ActualState = JobState;

impl JobState {
    /// An empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `doc` unless a document with the same name is already present,
    /// in which case `doc` is handed back untouched.
    ///
    /// # Errors
    /// Returns the rejected document on a name collision.
    pub fn try_insert(&mut self, doc: JobDocument) -> Result<(), Box<JobDocument>> {
        match self.jobs.entry(doc.name.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(doc);
                Ok(())
            }
            Entry::Occupied(_) => Err(Box::new(doc)),
        }
    }

    /// Look up a job by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&JobDocument> {
        self.jobs.get(name)
    }

    /// Whether a job with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    /// Number of jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether there are no jobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Job names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    /// Documents in name order.
    pub fn iter(&self) -> impl Iterator<Item = &JobDocument> {
        self.jobs.values()
    }

    /// Keep only the jobs whose name satisfies `keep`.
    #[must_use]
    pub fn filtered(mut self, mut keep: impl FnMut(&str) -> bool) -> Self {
        self.jobs.retain(|name, _| keep(name));
        self
    }
}

impl FromIterator<JobDocument> for JobState {
    /// Collect documents; on duplicate names the first one wins and the
    /// dropped one is logged.
    fn from_iter<I: IntoIterator<Item = JobDocument>>(iter: I) -> Self {
        let mut state = Self::new();
        for doc in iter {
            if let Err(dropped) = state.try_insert(doc) {
                warn!(job = dropped.name(), kind = %dropped.kind(), "duplicate job name ignored");
            }
        }
        state
    }
}

/// Enclosing folders of `name`, innermost first: `a/b/c` yields `a/b`, `a`.
pub fn ancestors(name: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(name.rsplit_once('/').map(|(parent, _)| parent), |&current| {
        current.rsplit_once('/').map(|(parent, _)| parent)
    })
}

/// Folder nesting level: `0` for top-level jobs.
#[must_use]
pub fn depth(name: &str) -> usize {
    name.matches('/').count()
}
