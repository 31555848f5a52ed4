//! Error types for the Inthegra client

use thiserror::Error;

/// Errors that can occur while talking to the Inthegra API or deriving
/// data from it
#[derive(Debug, Error)]
pub enum Error {
    /// Connection to the Inthegra service failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP request to the Inthegra service failed
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// Failed to parse a response or map a raw record
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The backend answered with an application-level `api.error.*` message
    #[error("Backend error: {0}")]
    Backend(String),

    /// No route matched the sought code exactly
    #[error("Route {code} not found")]
    RouteNotFound {
        /// The code the lookup was asked for
        code: String,
    },

    /// A refreshed collection no longer contains the entity's code
    #[error("No record with code {code} at {endpoint}")]
    RecordNotFound {
        /// Collection endpoint that was re-fetched
        endpoint: &'static str,
        /// The entity code that vanished upstream
        code: String,
    },

    /// Server-side search is not available for this entity type
    #[error("Search is not supported for {endpoint}")]
    SearchUnsupported {
        /// Collection endpoint the search was attempted on
        endpoint: &'static str,
    },

    /// Nearest-match search was given zero candidates
    #[error("Nearest search over an empty candidate set")]
    EmptyCandidates,

    /// A latitude/longitude string could not be parsed as decimal degrees
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinates(String),

    /// Request timeout
    #[error("Request timed out after {timeout_secs} seconds")]
    Timeout {
        /// The timeout duration in seconds
        timeout_secs: u64,
    },
}

impl Error {
    /// Returns true if this error is transport-level and worth retrying
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::RequestFailed(_) | Self::Timeout { .. }
        )
    }
}
