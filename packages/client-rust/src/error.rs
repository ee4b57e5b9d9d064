//! Error types for the async pivot client.

use pivot_core::{GridError, NormalizeError};

/// Errors surfaced by the data load service.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("data load service has been destroyed")]
    Destroyed,
    #[error("channel not ready after {waited_ms}ms")]
    ChannelNotReady { waited_ms: u64 },
    #[error("readiness wait cancelled")]
    Cancelled,
    #[error("send failed: {0}")]
    Send(#[source] anyhow::Error),
}

/// Errors returned by the pivot data builder.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("pivot builder has been destroyed")]
    Destroyed,
    #[error("request superseded by a newer query")]
    Superseded,
    #[error("no query has been loaded yet")]
    NotLoaded,
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("query engine error: {message}")]
    Engine { message: String },
    #[error("malformed chunk: {reason}")]
    MalformedChunk { reason: String },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
