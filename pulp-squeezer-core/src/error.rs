use std::path::PathBuf;

use thiserror::Error;

use crate::contract::TargetState;

/// Every failure a module invocation can end with.
///
/// `Setup` is kept apart from the rest: it means the client could not be built at all,
/// and callers report it with a different exit status than logical failures.
#[derive(Debug, Error)]
pub enum SqueezerError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: String, key: String },

    #[error("{entity} lookup by {key} matched {count} entities")]
    AmbiguousKey {
        entity: String,
        key: String,
        count: usize,
    },

    #[error("pulp api returned {status} for {method} {url}: {body}")]
    Remote {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("task {task} ended in state {state}: {message}")]
    TaskFailed {
        task: String,
        state: String,
        message: String,
    },

    #[error("task {task} did not finish within {seconds}s")]
    TaskTimeout { task: String, seconds: u64 },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("File checksum mismatch: expected {expected}, file has {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("{0}")]
    MissingIdentifier(String),

    #[error("state is {state} but all of the following are missing: {}", .missing.join(", "))]
    MissingParameter {
        state: TargetState,
        missing: Vec<String>,
    },

    #[error("invalid value for {parameter}: {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Unsupported(String),

    #[error("setup failed: {0}")]
    Setup(String),
}

impl SqueezerError {
    pub fn is_setup(&self) -> bool {
        matches!(self, SqueezerError::Setup(_))
    }

    /// True for a remote 404, which delete paths treat as "already gone".
    pub fn is_remote_not_found(&self) -> bool {
        matches!(self, SqueezerError::Remote { status: 404, .. })
    }
}
