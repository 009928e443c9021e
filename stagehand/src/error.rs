//! Domain error taxonomy shared by the lifecycle, state and registry layers.
//!
//! Adapters under [`crate::io`] return `anyhow::Result`; anything they raise
//! reaches callers as [`Error::Internal`]. The remaining variants are the
//! conditions callers are expected to branch on (and that the HTTP layer maps
//! to distinct status codes).

use thiserror::Error;

use crate::core::types::Slot;

#[derive(Debug, Error)]
pub enum Error {
    /// Target path or version already exists and was left untouched.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown version, commit, workspace or endpoint.
    #[error("not found: {0}")]
    NotFound(String),

    /// The code-generation collaborator failed, could not be spawned, or timed out.
    #[error("generation failed: {message}")]
    Generation { message: String, stderr: String },

    /// Optimistic concurrency violation on a state slot.
    #[error("stale token for {slot} slot: expected {expected}, current {current}")]
    StaleToken {
        slot: Slot,
        expected: String,
        current: String,
    },

    /// Transport-level failure talking to a proxied service.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("unknown component kind '{0}'")]
    UnknownComponent(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn generation(message: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
            stderr: stderr.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.into())
    }
}
