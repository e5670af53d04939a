//! Error types shared by the engine, with a coarse category per error.

use std::time::Duration;

use thiserror::Error;

use crate::config_loader::ConfigLoadError;
use crate::row::RowHash;
use crate::row::RowId;
use crate::row::TransitionState;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure of a single request, as seen by the request serializer.
///
/// Cloneable so one failure can be delivered to a caller and also recorded
/// on the row that issued it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected status {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("could not decode response: {0}")]
    Decode(String),

    /// The server answered but reported an error in its body.
    #[error("server error: {0}")]
    Server(String),

    #[error("not sending request while disconnected")]
    Disconnected,

    /// The request was discarded before it completed (queue cleared or
    /// engine reset).
    #[error("request dropped before completion")]
    Dropped,
}

impl TransportError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransportError::Disconnected => ErrorCategory::Disconnected,
            _ => ErrorCategory::Transport,
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("no row tracked with id {0}")]
    UnknownRow(RowId),

    #[error("row {row_id} is busy ({})", .state.as_str())]
    RowBusy {
        row_id: RowId,
        state: TransitionState,
    },

    /// The single-row refresh answered without the requested row.
    #[error("Server failed to return xpath #{row_id}")]
    RowMissing { row_id: RowId, row_hash: RowHash },

    #[error(transparent)]
    Config(#[from] ConfigLoadError),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Transport(err) => err.category(),
            EngineError::UnknownRow(_) | EngineError::RowBusy { .. } => ErrorCategory::Validation,
            EngineError::RowMissing { .. } => ErrorCategory::Consistency,
            EngineError::Config(_) => ErrorCategory::Validation,
        }
    }
}

/// Coarse classification used in structured log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Policy,
    Validation,
    Consistency,
    Disconnected,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transport => "TRANSPORT",
            ErrorCategory::Policy => "POLICY",
            ErrorCategory::Validation => "VALIDATION",
            ErrorCategory::Consistency => "CONSISTENCY",
            ErrorCategory::Disconnected => "DISCONNECTED",
        }
    }
}
