//! Top-level error taxonomy for the execution engine.
//!
//! Every subsystem (workspace, context, snapshot, phase, graph) defines its
//! own `thiserror` enum; `EngineError` composes them at the crate boundary so
//! the graph's routing logic can dispatch on `kind()`/`recoverable()` without
//! matching every variant by hand.

use std::path::PathBuf;
use thiserror::Error;

use crate::context::ContextError;
use crate::phase::PhaseError;
use crate::snapshot::SnapshotError;
use crate::workspace::WorkspaceError;

pub type EngineResult<T> = Result<T, EngineError>;

/// Coarse error classification, matching the taxonomy's "Kind" column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PathEscape,
    LlmTransient,
    ContextOverflow,
    LlmFatal,
    ToolTransient,
    ToolFatal,
    YamlValidation,
    IterationLimit,
    Cancelled,
    SnapshotIo,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PathEscape => "path_escape",
            Self::LlmTransient => "llm_transient",
            Self::ContextOverflow => "context_overflow",
            Self::LlmFatal => "llm_fatal",
            Self::ToolTransient => "tool_transient",
            Self::ToolFatal => "tool_fatal",
            Self::YamlValidation => "yaml_validation",
            Self::IterationLimit => "iteration_limit",
            Self::Cancelled => "cancelled",
            Self::SnapshotIo => "snapshot_io",
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("path escapes workspace root: {path}")]
    PathEscape { path: PathBuf },

    #[error("LLM transport error (attempt {attempt}): {message}")]
    LlmTransient { attempt: u32, message: String },

    #[error("context overflow: {token_count} tokens exceeds limit {limit} ({body_bytes} bytes)")]
    ContextOverflow {
        token_count: usize,
        limit: usize,
        body_bytes: usize,
    },

    #[error("LLM returned malformed response: {message}")]
    LlmFatal { message: String },

    #[error("tool '{tool}' failed (attempt {attempt}): {message}")]
    ToolTransient {
        tool: String,
        attempt: u32,
        message: String,
    },

    #[error("tool '{tool}' failed after {attempts} attempts: {message}")]
    ToolFatal {
        tool: String,
        attempts: u32,
        message: String,
    },

    #[error("todos.yaml validation failed at item {index}: {message}")]
    YamlValidation { index: usize, message: String },

    #[error("iteration limit reached: {iteration} >= {max}")]
    IterationLimit { iteration: u64, max: u64 },

    #[error("job cancelled")]
    Cancelled,

    #[error("snapshot I/O error: {message}")]
    SnapshotIo { message: String },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PathEscape { .. } | Self::Workspace(WorkspaceError::PathEscape { .. }) => {
                ErrorKind::PathEscape
            }
            Self::LlmTransient { .. } => ErrorKind::LlmTransient,
            Self::ContextOverflow { .. } => ErrorKind::ContextOverflow,
            Self::LlmFatal { .. } => ErrorKind::LlmFatal,
            Self::ToolTransient { .. } => ErrorKind::ToolTransient,
            Self::ToolFatal { .. } => ErrorKind::ToolFatal,
            Self::YamlValidation { .. } | Self::Phase(PhaseError::Validation { .. }) => {
                ErrorKind::YamlValidation
            }
            Self::IterationLimit { .. } => ErrorKind::IterationLimit,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::SnapshotIo { .. } | Self::Snapshot(_) => ErrorKind::SnapshotIo,
            Self::Workspace(_) => ErrorKind::PathEscape,
            Self::Context(_) => ErrorKind::ContextOverflow,
            Self::Phase(_) => ErrorKind::YamlValidation,
            Self::Io(_) => ErrorKind::SnapshotIo,
        }
    }

    /// Whether the engine may retry/compensate automatically, per the
    /// disposition column of the error taxonomy.
    pub fn recoverable(&self) -> bool {
        match self.kind() {
            ErrorKind::PathEscape
            | ErrorKind::LlmFatal
            | ErrorKind::YamlValidation
            | ErrorKind::IterationLimit => false,
            ErrorKind::LlmTransient
            | ErrorKind::ContextOverflow
            | ErrorKind::ToolTransient
            | ErrorKind::ToolFatal
            | ErrorKind::Cancelled
            | ErrorKind::SnapshotIo => true,
        }
    }

    pub fn path_escape(path: impl Into<PathBuf>) -> Self {
        Self::PathEscape { path: path.into() }
    }

    pub fn llm_transient(attempt: u32, message: impl Into<String>) -> Self {
        Self::LlmTransient {
            attempt,
            message: message.into(),
        }
    }

    pub fn context_overflow(token_count: usize, limit: usize, body_bytes: usize) -> Self {
        Self::ContextOverflow {
            token_count,
            limit,
            body_bytes,
        }
    }

    pub fn tool_fatal(tool: impl Into<String>, attempts: u32, message: impl Into<String>) -> Self {
        Self::ToolFatal {
            tool: tool.into(),
            attempts,
            message: message.into(),
        }
    }

    pub fn iteration_limit(iteration: u64, max: u64) -> Self {
        Self::IterationLimit { iteration, max }
    }
}

/// A rendered, persisted error record matching `JobState.error`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JobError {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub recoverable: bool,
}

impl From<&EngineError> for JobError {
    fn from(err: &EngineError) -> Self {
        Self {
            message: err.to_string(),
            kind: err.kind().as_str().to_string(),
            recoverable: err.recoverable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_escape_is_not_recoverable() {
        let err = EngineError::path_escape("/etc/passwd");
        assert_eq!(err.kind().as_str(), "path_escape");
        assert!(!err.recoverable());
    }

    #[test]
    fn llm_transient_is_recoverable() {
        let err = EngineError::llm_transient(1, "timeout");
        assert!(err.recoverable());
    }

    #[test]
    fn iteration_limit_is_not_recoverable() {
        let err = EngineError::iteration_limit(100, 100);
        assert!(!err.recoverable());
    }

    #[test]
    fn job_error_conversion_preserves_kind() {
        let err = EngineError::tool_fatal("write_file", 3, "disk full");
        let job_err: JobError = (&err).into();
        assert_eq!(job_err.kind, "tool_fatal");
        assert!(job_err.recoverable);
    }
}
