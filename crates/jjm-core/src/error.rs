//! Fatal reconciliation errors and the stage they abort.
//!
//! Only errors that stop a run live here. Per-job problems (a config that
//! could not be fetched, a mutation the server refused) are recorded on the
//! affected entry instead and never abort sibling jobs.

use std::fmt;
use std::path::PathBuf;

use jjm_jenkins::ServerError;
use serde::Serialize;
use thiserror::Error;

/// Steps of a reconciliation run, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Turning local definitions into desired state.
    Rendering,
    /// Reading actual state from the server.
    Fetching,
    /// Computing the changeset.
    Diffing,
    /// Producing the human-readable plan.
    Previewing,
    /// Sending mutations to the server.
    Applying,
    /// Writing remote-only jobs to local definitions.
    Importing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rendering => write!(f, "rendering"),
            Self::Fetching => write!(f, "fetching"),
            Self::Diffing => write!(f, "diffing"),
            Self::Previewing => write!(f, "previewing"),
            Self::Applying => write!(f, "applying"),
            Self::Importing => write!(f, "importing"),
        }
    }
}

/// An error that aborts a reconciliation run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A local definition could not be read, parsed or rendered.
    #[error("cannot render {}: {cause}", path.display())]
    Render {
        /// The file or directory being rendered.
        path: PathBuf,
        /// What went wrong.
        cause: String,
    },

    /// Two definitions produce a job with the same name.
    #[error("job `{name}` is defined more than once ({first}; {second})")]
    DuplicateJob {
        /// The ambiguous job name.
        name: String,
        /// Where the first definition came from.
        first: String,
        /// Where the conflicting definition came from.
        second: String,
    },

    /// The server could not be listed (network, auth, or server failure).
    #[error("server unavailable: {cause}")]
    ServerUnavailable {
        /// The underlying client error.
        cause: ServerError,
    },

    /// A local file could not be written.
    #[error("cannot write {}: {source}", path.display())]
    Io {
        /// The file being written.
        path: PathBuf,
        /// The I/O failure.
        source: std::io::Error,
    },
}

impl ReconcileError {
    /// Build a [`ReconcileError::Render`].
    pub fn render(path: impl Into<PathBuf>, cause: impl fmt::Display) -> Self {
        Self::Render {
            path: path.into(),
            cause: cause.to_string(),
        }
    }

    /// The stage the run was in when this error stopped it.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Render { .. } | Self::DuplicateJob { .. } => Stage::Rendering,
            Self::ServerUnavailable { .. } => Stage::Fetching,
            Self::Io { .. } => Stage::Importing,
        }
    }

    /// Whether the server may have been contacted before the failure.
    #[must_use]
    pub const fn reached_server(&self) -> bool {
        !matches!(self.stage(), Stage::Rendering)
    }
}
