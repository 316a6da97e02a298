use std::path::PathBuf;

use thiserror::Error;

/// Enumerates supported `FilterError` values.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid filter pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Enumerates supported `PersistenceError` values.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to access persistence file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode persistence file {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode persistence document: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("persistence file {path} has unsupported schema_version {found} (expected {expected})")]
    UnsupportedSchemaVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("persistence lock poisoned: {0}")]
    LockPoisoned(&'static str),
    #[error("invalid persistence key '{raw}': {reason}")]
    InvalidKey { raw: String, reason: &'static str },
    #[error("no conversation is bound to this update")]
    NoActiveConversation,
}

/// Faults raised while routing one update.
///
/// Every mux boundary either hands these to its fault handler or returns them
/// to the caller unchanged.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Step(#[from] anyhow::Error),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("{message}")]
    Panicked { message: String },
    #[error("conversation '{conversation_id}' chained more than {limit} state-entry hooks")]
    EnterHookChainExceeded {
        conversation_id: String,
        limit: usize,
    },
}

impl DispatchError {
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked { .. })
    }
}
