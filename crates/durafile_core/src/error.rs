//! Error types for DuraFile core.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// The stage a commit had reached when an injected failure stopped it.
///
/// Used by the crash-recovery test harness: aborting a commit at each
/// stage and reopening the stream must reproduce the documented
/// NO-UNDO/REDO guarantee. The checkpoint variants name the stages of
/// the internal checkpoint-renewal transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStage {
    /// The BEGIN record was durably logged.
    LogBegin,
    /// A WRITE record was durably logged.
    LogWrite,
    /// The COMMIT record was durably logged.
    LogCommit,
    /// Pending writes were applied to the data file.
    DataFileWrite,
    /// The END record was durably logged.
    LogEnd,
    /// Checkpoint renewal: the BEGIN record was durably logged.
    CheckpointLogBegin,
    /// Checkpoint renewal: the WRITE record was durably logged.
    CheckpointLogWrite,
    /// Checkpoint renewal: the pointer cell was durably rewritten.
    CheckpointPointerWrite,
    /// Checkpoint renewal: the END record was durably logged.
    CheckpointLogEnd,
}

impl fmt::Display for CommitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LogBegin => "log begin",
            Self::LogWrite => "log write",
            Self::LogCommit => "log commit",
            Self::DataFileWrite => "data file write",
            Self::LogEnd => "log end",
            Self::CheckpointLogBegin => "checkpoint log begin",
            Self::CheckpointLogWrite => "checkpoint log write",
            Self::CheckpointPointerWrite => "checkpoint pointer write",
            Self::CheckpointLogEnd => "checkpoint log end",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in DuraFile core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] durafile_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A commit was stopped by an injected failure after the named stage.
    #[error("commit interrupted after {stage}")]
    CommitInterrupted {
        /// The stage the commit had completed when it was stopped.
        stage: CommitStage,
    },

    /// A seek resolved to a position before the start of the stream.
    #[error("seek to negative position: {offset}")]
    SeekBeforeStart {
        /// The resolved (negative) absolute offset.
        offset: i64,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
