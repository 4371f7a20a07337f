use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the polling core.
#[derive(Error, Debug)]
pub enum PollError {
    #[error("storage unavailable at {}: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not acquire session cookies from {host} after {attempts} attempt(s)")]
    CredentialAcquisitionFailed { host: String, attempts: u32 },

    #[error("session cookie from {host} cannot be sent back: {reason}")]
    UnusableCredential { host: String, reason: String },

    #[error("circuit breaker open, call rejected")]
    CircuitOpen,

    #[error("upstream returned HTTP {status}")]
    UpstreamError { status: u16 },

    #[error("malformed catalog payload: {0}")]
    DecodeError(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid request url: {0}")]
    InvalidUrl(String),

    #[error("header pool unusable: {0}")]
    HeaderPool(String),

    #[error("notifier queue closed")]
    NotifierClosed,
}

impl PollError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Whether a storage read failed because the file content could not be
    /// decoded, as opposed to the file being inaccessible.
    pub fn is_corrupt_storage(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable { source, .. } if source.kind() == std::io::ErrorKind::InvalidData
        )
    }

    /// Whether this outcome of a listing fetch should count against the breaker.
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(
            self,
            Self::UpstreamError { .. } | Self::DecodeError(_) | Self::Transport(_) | Self::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PollError>;
