//! Error types for the resource graph engine.
//!
//! Transports report failures as [`anyhow::Error`]; the engine wraps them
//! in [`Error::Transport`] untouched so callers see the transport's error
//! verbatim.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Caller or catalog misuse: missing identity fields, bad filter
    /// operations, malformed descriptors.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown resource kind: {0}")]
    UnknownKind(String),

    #[error("{kind} not found ({identity})")]
    NotFound { kind: String, identity: String },

    #[error("{kind} lookup is ambiguous: {count} records matched ({identity})")]
    Ambiguous {
        kind: String,
        identity: String,
        count: usize,
    },

    #[error("{kind} does not support {operation}")]
    Unsupported {
        kind: String,
        operation: &'static str,
    },

    /// A relation field was assigned resources of the wrong kind.
    #[error("relation expects {expected} resources, got {actual}")]
    RelationType { expected: String, actual: String },

    #[error("malformed response from {call}: {reason}")]
    MalformedResponse { call: String, reason: String },

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// True for the not-found/ambiguous family returned by `get`/`load`.
    pub fn is_lookup_failure(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::Ambiguous { .. })
    }
}
