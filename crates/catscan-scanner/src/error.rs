//! Error types for the CatSCAN scanner

use crate::snapshot::ScanSnapshot;
use catscan_api::ApiError;
use thiserror::Error;

/// Result type for scanner operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Failures of a scan as a whole
///
/// Per-workspace failures are not errors; they are recorded in the snapshot.
#[derive(Error, Debug)]
pub enum ScanError {
    /// No credential, or the server rejected it
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    /// The workspace list itself could not be fetched
    #[error("Failed to list workspaces for {organization}: {source}")]
    WorkspaceListing {
        organization: String,
        #[source]
        source: ApiError,
    },

    /// Cancelled before the workspace list was available
    #[error("Scan cancelled")]
    Cancelled,

    /// Every workspace failed or was cancelled
    #[error("No workspace scanned successfully ({failed} failed, {cancelled} cancelled)")]
    NothingSucceeded {
        failed: usize,
        cancelled: usize,
        /// The assembled snapshot, for inspecting per-workspace errors
        snapshot: Box<ScanSnapshot>,
    },

    /// Invalid scan parameters
    #[error("Invalid scan configuration: {0}")]
    Config(String),
}

impl ScanError {
    pub(crate) fn from_api(organization: &str, err: ApiError) -> Self {
        match err {
            ApiError::Unauthenticated(msg) => Self::Unauthenticated(msg),
            ApiError::Cancelled => Self::Cancelled,
            ApiError::Config(msg) => Self::Config(msg),
            source => Self::WorkspaceListing {
                organization: organization.to_string(),
                source,
            },
        }
    }
}
