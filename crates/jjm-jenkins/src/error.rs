//! Error types for Jenkins server operations.
//!
//! [`ServerError`] is the single error type returned by all
//! [`JobServer`](crate::JobServer) methods. Variants are split by failure mode
//! so callers (and the retry loop) can classify a failure without parsing
//! message text.

use thiserror::Error;

/// Errors returned by [`JobServer`](crate::JobServer) operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The server rejected the configured credentials (HTTP 401/403).
    #[error("authentication rejected by {url} (HTTP {status})")]
    Unauthorized {
        /// The URL that rejected the request.
        url: String,
        /// The HTTP status code returned.
        status: u16,
    },

    /// The requested job does not exist on the server.
    #[error("job `{name}` not found")]
    NotFound {
        /// Full job name (folder path included).
        name: String,
    },

    /// The server answered with an unexpected HTTP status.
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        /// The request URL.
        url: String,
        /// The HTTP status code returned.
        status: u16,
        /// The (possibly truncated) response body.
        body: String,
    },

    /// The request never produced a response (DNS, connect, TLS, timeout).
    #[error("request to {url} failed: {message}")]
    Transport {
        /// The request URL.
        url: String,
        /// Description of the transport failure.
        message: String,
    },

    /// The server responded, but the payload could not be understood.
    #[error("invalid response from {url}: {message}")]
    InvalidResponse {
        /// The request URL.
        url: String,
        /// What was wrong with the payload.
        message: String,
    },

    /// A job name or server URL could not be turned into a request URL.
    #[error("invalid url `{value}`: {reason}")]
    InvalidUrl {
        /// The offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The client refused the operation before contacting the server
    /// (used by test doubles to inject failures).
    #[error("{message}")]
    Rejected {
        /// Description of the refusal.
        message: String,
    },
}

impl ServerError {
    /// Whether repeating the same request could plausibly succeed.
    ///
    /// Transport failures, server-side errors (5xx) and throttling (429) are
    /// retryable. Auth failures, missing jobs and client errors are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Unauthorized { .. }
            | Self::NotFound { .. }
            | Self::InvalidResponse { .. }
            | Self::InvalidUrl { .. }
            | Self::Rejected { .. } => false,
        }
    }
}
