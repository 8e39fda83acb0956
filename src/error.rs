use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Runtime failures raised by the browser layer.
///
/// Expected automation misses (element absent, element covered) are not
/// errors; they come back as structured outcomes. A `PublishError` means the
/// session itself is in trouble.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("CONNECTION_CLOSED: browser connection is closed")]
    ConnectionClosed,

    #[error("LAUNCH_FAILED: {0}")]
    Launch(String),

    #[error("PROFILE_BUSY: profile {} is held by another browser or publisher instance", .0.display())]
    ProfileBusy(PathBuf),

    #[error("CONNECTION_FAILED: {0}")]
    Connection(String),

    #[error("PROTOCOL_ERROR: {0}")]
    Protocol(String),

    #[error("TIMEOUT: {what} did not complete within {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("FILE_NOT_FOUND: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("CANCELLED: workflow cancelled by caller")]
    Cancelled,

    #[error("NOT_SUPPORTED: {0}")]
    NotSupported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PublishError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Whether the underlying transport is gone and no further call can succeed.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::Connection(_))
    }
}

pub type Result<T, E = PublishError> = std::result::Result<T, E>;
