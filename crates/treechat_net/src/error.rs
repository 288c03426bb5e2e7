//! Network error types.

use std::time::Duration;

/// Errors that can occur in the treechat_net crate.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// An I/O error occurred (connect refused, reset, bind failure).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A line on the wire could not be parsed.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An operation timed out.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The directory could not be reached or closed before answering.
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// A write was attempted on a link whose connection is gone.
    #[error("Link closed: {0}")]
    LinkClosed(String),

    /// The remote left a full outbound queue unread; the link was dropped.
    #[error("Link stalled: {0}")]
    LinkStalled(String),

    /// JSON serialization / deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
