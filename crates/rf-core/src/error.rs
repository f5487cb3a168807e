//! Unified error type for reelforge.
//!
//! All crates funnel their failures into [`Error`]. [`Error::kind`] gives the
//! coarse classification carried by [`GenerationOutcome`](crate::GenerationOutcome)
//! so callers can branch on the failure class without matching strings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unified error type covering all failure modes in reelforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transcoder ran and exited with a non-zero status.
    #[error("Transcode failure [{tool}] (exit code {}): {diagnostics}", fmt_exit_code(.exit_code))]
    TranscodeFailure {
        /// Name of the tool that failed.
        tool: String,
        /// Process exit code, `None` when terminated by a signal.
        exit_code: Option<i32>,
        /// Tail of the captured diagnostic stream.
        diagnostics: String,
    },

    /// The transcoder exceeded its request-level time budget.
    #[error("Transcode timeout [{tool}]: timed out after {timeout:?}")]
    TranscodeTimeout {
        /// Name of the tool that timed out.
        tool: String,
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// An external tool could not be located or spawned.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An upstream generation call (text, speech, image) failed.
    #[error("Backend error [{backend}]: {message}")]
    Backend {
        /// The backend that failed (e.g. "image", "speech").
        backend: String,
        /// Human-readable error description.
        message: String,
    },

    /// Outputs are missing before assembly.
    #[error("Verification failed: missing images: {missing_images}/{total_images}, missing audio parts: {missing_audio}/{total_audio}")]
    VerificationDeficiency {
        missing_images: usize,
        total_images: usize,
        missing_audio: usize,
        total_audio: usize,
    },

    /// The operation was cancelled by the user or a sibling branch.
    #[error("Cancelled")]
    Cancelled,

    /// Request or configuration data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A pipeline step failed.
    #[error("Pipeline error [{step}]: {message}")]
    Pipeline {
        /// The pipeline step that failed.
        step: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn fmt_exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TranscodeFailure,
    TranscodeTimeout,
    BackendCallFailure,
    VerificationDeficiency,
    Cancelled,
    Other,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TranscodeFailure { .. } => ErrorKind::TranscodeFailure,
            Error::TranscodeTimeout { .. } => ErrorKind::TranscodeTimeout,
            Error::Backend { .. } => ErrorKind::BackendCallFailure,
            Error::VerificationDeficiency { .. } => ErrorKind::VerificationDeficiency,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Tool { .. }
            | Error::Validation(_)
            | Error::Io { .. }
            | Error::Pipeline { .. }
            | Error::Internal(_) => ErrorKind::Other,
        }
    }

    /// Whether this error represents cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Backend`].
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Pipeline`].
    pub fn pipeline(step: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Pipeline {
            step: step.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
