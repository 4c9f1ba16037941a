//! Diff engine: desired × actual → [`Changeset`].
//!
//! [`diff`] is a pure function. Both states are already name-ordered, so the
//! changeset is produced by a single merge-join over the two sides and is
//! sorted by job name (byte-wise) with exactly one entry per name in the
//! union.
//!
//! | desired | actual            | change                       |
//! |---------|-------------------|------------------------------|
//! | yes     | no                | Create                       |
//! | no      | yes               | Delete                       |
//! | yes     | yes, same hash    | Unchanged                    |
//! | yes     | yes, other hash   | Update                       |
//! | yes     | yes, degraded     | Update + detail              |
//! | no      | yes, degraded     | Delete + detail              |

use std::cmp::Ordering;
use std::fmt;
use std::iter::Peekable;

use serde::Serialize;

use crate::model::{ActualState, DesiredState, JobDocument};

/// How one job differs between desired and actual state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Present locally only.
    Create,
    /// Present on both sides with different content.
    Update,
    /// Present on the server only.
    Delete,
    /// Present on both sides with identical content.
    Unchanged,
}

impl ChangeKind {
    /// The verb used in previews and reports.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Unchanged => "unchanged",
        }
    }

    /// One-character preview marker.
    #[must_use]
    pub const fn marker(self) -> char {
        match self {
            Self::Create => '+',
            Self::Update => '~',
            Self::Delete => '-',
            Self::Unchanged => ' ',
        }
    }

    /// Whether applying this kind issues a server call.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// One entry of a [`Changeset`].
///
/// - Create: `after` only
/// - Delete: `before` only
/// - Update: both, with differing hashes or a degraded `before`
/// - Unchanged: both, equal
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    /// The job this change targets.
    pub job_name: String,
    /// What kind of change it is.
    pub kind: ChangeKind,
    /// Actual state, if the job exists on the server.
    pub before: Option<JobDocument>,
    /// Desired state, if the job is defined locally.
    pub after: Option<JobDocument>,
    /// Set when the server-side state could not be verified.
    pub detail: Option<String>,
}

impl Change {
    fn create(after: &JobDocument) -> Self {
        Self {
            job_name: after.name().to_owned(),
            kind: ChangeKind::Create,
            before: None,
            after: Some(after.clone()),
            detail: None,
        }
    }

    fn delete(before: &JobDocument) -> Self {
        Self {
            job_name: before.name().to_owned(),
            kind: ChangeKind::Delete,
            before: Some(before.clone()),
            after: None,
            detail: unverified(before),
        }
    }

    fn compare(after: &JobDocument, before: &JobDocument) -> Self {
        let kind = if after.same_content(before) {
            ChangeKind::Unchanged
        } else {
            ChangeKind::Update
        };
        Self {
            job_name: after.name().to_owned(),
            kind,
            before: Some(before.clone()),
            after: Some(after.clone()),
            detail: unverified(before),
        }
    }
}

fn unverified(before: &JobDocument) -> Option<String> {
    before
        .degraded_reason()
        .map(|reason| format!("current configuration could not be verified: {reason}"))
}

/// Per-kind tallies of a [`Changeset`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    /// Number of Create entries.
    pub created: usize,
    /// Number of Update entries.
    pub updated: usize,
    /// Number of Delete entries.
    pub deleted: usize,
    /// Number of Unchanged entries.
    pub unchanged: usize,
}

impl ChangeCounts {
    /// Entries that would issue a server call.
    #[must_use]
    pub const fn pending(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

impl fmt::Display for ChangeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Summary: {} created, {} updated, {} deleted, {} unchanged.",
            self.created, self.updated, self.deleted, self.unchanged
        )
    }
}

/// Ordered changes, one per job name in desired ∪ actual.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Changeset {
    changes: Vec<Change>,
}

impl Changeset {
    /// Entries in name order.
    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    /// Entries as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[Change] {
        &self.changes
    }

    /// Number of entries, Unchanged included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether the changeset has no entries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Entries other than Unchanged.
    pub fn pending(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(|c| c.kind.is_pending())
    }

    /// Whether applying would issue any server call.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.pending().next().is_some()
    }

    /// The entry for `job_name`.
    #[must_use]
    pub fn get(&self, job_name: &str) -> Option<&Change> {
        self.changes
            .binary_search_by(|c| c.job_name.as_str().cmp(job_name))
            .ok()
            .and_then(|i| self.changes.get(i))
    }

    /// Per-kind tallies.
    #[must_use]
    pub fn counts(&self) -> ChangeCounts {
        let mut counts = ChangeCounts::default();
        for change in &self.changes {
            match change.kind {
                ChangeKind::Create => counts.created += 1,
                ChangeKind::Update => counts.updated += 1,
                ChangeKind::Delete => counts.deleted += 1,
                ChangeKind::Unchanged => counts.unchanged += 1,
            }
        }
        counts
    }
}

impl<'a> IntoIterator for &'a Changeset {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

enum Side<'a> {
    Desired(&'a JobDocument),
    Actual(&'a JobDocument),
    Both(&'a JobDocument, &'a JobDocument),
}

fn next_pair<'a, D, A>(desired: &mut Peekable<D>, actual: &mut Peekable<A>) -> Option<Side<'a>>
where
    D: Iterator<Item = &'a JobDocument>,
    A: Iterator<Item = &'a JobDocument>,
{
    let order = match (desired.peek(), actual.peek()) {
        (None, None) => return None,
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(d), Some(a)) => d.name().cmp(a.name()),
    };
    match order {
        Ordering::Less => desired.next().map(Side::Desired),
        Ordering::Greater => actual.next().map(Side::Actual),
        Ordering::Equal => match (desired.next(), actual.next()) {
            (Some(d), Some(a)) => Some(Side::Both(d, a)),
            _ => None,
        },
    }
}

/// Compare desired state against actual state.
#[must_use]
pub fn diff(desired: &DesiredState, actual: &ActualState) -> Changeset {
    let mut desired = desired.iter().peekable();
    let mut actual = actual.iter().peekable();
    let mut changes = Vec::new();

    while let Some(side) = next_pair(&mut desired, &mut actual) {
        changes.push(match side {
            Side::Desired(after) => Change::create(after),
            Side::Actual(before) => Change::delete(before),
            Side::Both(after, before) => Change::compare(after, before),
        });
    }

    Changeset { changes }
}
