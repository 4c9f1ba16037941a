//! Jenkins server seam for jjm.
//!
//! This crate defines the [`JobServer`] trait — the single interface through
//! which the reconciliation engine reads and mutates remote jobs. Nothing
//! outside this crate speaks HTTP to Jenkins.
//!
//! # Crate layout
//!
//! - [`server`] — the [`JobServer`] trait and [`JobSummary`].
//! - [`client`] — [`JenkinsClient`], the blocking `reqwest` implementation,
//!   plus [`RetryPolicy`] and connection settings.
//! - [`memory`] — [`MemoryServer`], an in-memory double with failure
//!   injection and a call log.
//! - [`error`] — the [`ServerError`] enum returned by all trait methods.

pub mod client;
pub mod error;
pub mod memory;
pub mod server;

pub use client::{ClientConfig, Credentials, JenkinsClient, RetryPolicy};
pub use error::ServerError;
pub use memory::{Call, MemoryServer};
pub use server::{JobServer, JobSummary};
