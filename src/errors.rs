use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::CodeName;

/// Error type for query, merge, and output failures.
///
/// Every variant except `Io` and `Configuration` is scoped to a single code;
/// the collector records it against that code and moves on.
#[derive(Debug, Error)]
pub enum CollectError {
    /// The remote answered with a non-retryable status.
    #[error("query for '{code}' failed with status {status}: {body}")]
    Api {
        /// Code being queried.
        code: CodeName,
        /// HTTP status.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Every attempt failed with a retryable error.
    #[error("query for '{code}' gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Code being queried.
        code: CodeName,
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last_error: String,
    },
    /// The request could not be sent or its response read.
    #[error("query for '{code}' failed: {reason}")]
    Transport {
        /// Code being queried.
        code: CodeName,
        /// Underlying error.
        reason: String,
    },
    /// The response was not the expected JSON shape.
    #[error("query for '{code}' returned an unreadable response: {reason}")]
    MalformedResponse {
        /// Code being queried.
        code: CodeName,
        /// Parse error.
        reason: String,
    },
    /// A previously written output file cannot be read back.
    #[error("existing output {} is unreadable at line {line}: {reason}", path.display())]
    CorruptOutput {
        /// File that failed to load.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// Parse error.
        reason: String,
    },
    /// Filesystem error.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CollectError {
    /// Code this error is attributed to, when it is scoped to one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. }
            | Self::RetriesExhausted { code, .. }
            | Self::Transport { code, .. }
            | Self::MalformedResponse { code, .. } => Some(code),
            Self::CorruptOutput { .. } | Self::Io(_) | Self::Configuration(_) => None,
        }
    }
}
