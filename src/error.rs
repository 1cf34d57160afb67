//! Error types for the cyz-annotate library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`CyzError`]: **Fatal** for the operation that raised it: a stage could
//!   not run or failed, the annotation store could not be read or written, or
//!   the navigator was asked to move somewhere that does not exist. Returned as
//!   `Err(CyzError)` from every fallible library call.
//!
//! * [`PurgeError`]: **Non-fatal**: a single leftover file could not be
//!   removed while resetting the workspace. Collected inside
//!   [`crate::workspace::ResetReport`] so session startup always proceeds.
//!
//! No error is retried automatically. [`CyzError::is_retryable`] tells the
//! caller whether re-invoking the same operation can succeed without first
//! running something else.

use crate::pipeline::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the cyz-annotate library.
#[derive(Debug, Error)]
pub enum CyzError {
    // ── Stage errors ──────────────────────────────────────────────────────
    /// A stage's declared input artifact is absent or empty.
    #[error("Cannot run the {stage} stage: required input '{path}' is missing or empty.\n{}", .stage.precondition_hint())]
    MissingPrecondition { stage: Stage, path: PathBuf },

    /// The external decoder or extractor ran and failed.
    ///
    /// `diagnostic` is the tool's own output, preserved verbatim.
    #[error("{stage} stage failed: {tool} exited with {}\n{diagnostic}", .status.map(|c| format!("status {c}")).unwrap_or_else(|| "no exit status".to_string()))]
    ExternalToolFailure {
        stage: Stage,
        tool: String,
        status: Option<i32>,
        diagnostic: String,
    },

    /// No decoder/extractor could be resolved from config or environment.
    #[error("No tool configured for the {stage} stage.\n{hint}")]
    ToolNotConfigured { stage: Stage, hint: String },

    // ── Acquisition errors ────────────────────────────────────────────────
    /// Source unreachable or transfer incomplete.
    #[error("Failed to acquire '{location}': {reason}\nCheck the URL and your internet connection.")]
    AcquisitionFailure { location: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{location}'\nIncrease --download-timeout.")]
    AcquisitionTimeout { location: String, secs: u64 },

    // ── Annotation store errors ───────────────────────────────────────────
    /// The annotation file could not be written. The edit is not lost; retry the save.
    #[error("Failed to write annotations to '{path}': {source}")]
    StorageWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The annotation file exists but cannot be read or parsed.
    #[error("Failed to read annotations from '{path}': {detail}")]
    StorageReadFailure { path: PathBuf, detail: String },

    /// The annotation itself is unusable (empty key, too many values).
    #[error("Invalid annotation: {0}")]
    InvalidAnnotation(String),

    // ── Navigation errors ─────────────────────────────────────────────────
    /// Requested cursor position is outside the image list.
    #[error("Image index {index} is out of range ({len} images)")]
    OutOfRange { index: isize, len: usize },

    // ── Workspace / config errors ─────────────────────────────────────────
    /// The workspace directory could not be created or resolved.
    #[error("Workspace '{path}' is unavailable: {source}")]
    WorkspaceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CyzError {
    /// Whether re-invoking the same operation may succeed as-is.
    ///
    /// Tool failures, acquisition problems and failed saves depend on the
    /// environment and are worth retrying. A missing precondition needs the
    /// previous stage first; out-of-range and invalid input need different
    /// arguments.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CyzError::ExternalToolFailure { .. }
                | CyzError::AcquisitionFailure { .. }
                | CyzError::AcquisitionTimeout { .. }
                | CyzError::StorageWriteFailure { .. }
        )
    }

    /// The pipeline stage this error belongs to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            CyzError::MissingPrecondition { stage, .. }
            | CyzError::ExternalToolFailure { stage, .. }
            | CyzError::ToolNotConfigured { stage, .. } => Some(*stage),
            CyzError::AcquisitionFailure { .. } | CyzError::AcquisitionTimeout { .. } => {
                Some(Stage::Acquire)
            }
            _ => None,
        }
    }
}

/// A non-fatal error for a single file during workspace reset.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[error("Could not remove '{path}': {detail}")]
pub struct PurgeError {
    pub path: PathBuf,
    pub detail: String,
}
