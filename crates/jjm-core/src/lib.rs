//! Reconciliation engine for jjm.
//!
//! Local job definitions are rendered into desired state, the server is read
//! into actual state, and the two are diffed into an ordered [`Changeset`]
//! that can be previewed or applied job by job.
//!
//! # Crate layout
//!
//! - [`model`] — [`JobDocument`], canonical content and [`JobState`].
//! - [`render`] — definitions directory → desired state, via a
//!   [`DefinitionRenderer`] (normally Jenkins Job Builder).
//! - [`fetch`] — server → actual state, degrading unreadable jobs.
//! - [`diff`] — the pure diff engine.
//! - [`preview`] — changeset → plan text.
//! - [`apply`] — confirmation-gated execution with per-job outcomes.
//! - [`import`] — remote-only jobs → local raw definitions.
//! - [`metadata`] — `key: value` checks on job descriptions.
//! - [`reconcile`] — the orchestrator tying the stages together.
//! - [`filter`] and [`pool`] — `--target` globs and the bounded worker pool.
//! - [`error`] — [`ReconcileError`] and [`Stage`].

pub mod apply;
pub mod diff;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod import;
pub mod metadata;
pub mod model;
pub mod pool;
pub mod preview;
pub mod reconcile;
pub mod render;

pub use apply::{ApplyOptions, ApplyOutcome, ApplyReport, CancelFlag, JobOutcome, JobStatus, Tally};
pub use diff::{Change, ChangeCounts, ChangeKind, Changeset, diff};
pub use error::{ReconcileError, Stage};
pub use fetch::{FetchOptions, ORGANIZATION_FOLDER};
pub use filter::NameFilter;
pub use import::{ImportReport, RAW_JOBS_FILE};
pub use metadata::{MetadataRules, extract_metadata, validate_metadata};
pub use model::{ActualState, ContentHash, DesiredState, JobDocument, JobKind, JobState};
pub use preview::{PreviewOptions, render_preview};
pub use reconcile::{CheckReport, Plan, ReconcileOptions, Reconciler, check_definitions};
pub use render::{DefinitionProblem, DefinitionRenderer, JobBuilderRenderer, RenderRequest, RenderedJob};
