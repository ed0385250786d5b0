// SPDX-License-Identifier: MIT OR Apache-2.0
//! Editor error kinds.

use karst_project::StreamError;
use thiserror::Error;

/// Errors surfaced by the editor core.
///
/// The command journal itself never propagates errors: a command that
/// fails to execute is logged, dropped and not recorded. These kinds
/// cover the loaders, the replay harness and the façade guards.
#[derive(Debug, Error)]
pub enum EditorError {
    /// A blob snapshot had a bad magic number or payload hash.
    #[error("corrupt file")]
    CorruptFile,

    /// A payload was written by a newer build than this one.
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),

    /// A directory snapshot contains a scene file for a scene that is
    /// not registered.
    #[error("unknown scene `{0}`")]
    UnknownScene(String),

    /// A command log names a command type with no registered creator.
    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    /// Reparenting would create a hierarchy cycle.
    #[error("hierarchy cannot contain a cycle")]
    CycleInHierarchy,

    /// The operation is not allowed in the current state, e.g.
    /// destroying the editor camera.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Underlying IO failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed command log.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Truncated or malformed binary payload.
    #[error(transparent)]
    Stream(#[from] StreamError),
}
