//! Defines the crate `Error` and `Result` types, plus the user-facing tool error.

use crate::types::ErrorData;

/// The primary error type for zapmcp.
///
/// Session, transport and registration failures all surface as one of these variants.
/// Failures raised by embedding-application callbacks travel as `anyhow::Error` instead
/// and are mapped onto protocol errors or error-flagged results by the session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network or pipe I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be encoded or decoded as JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The peer answered one of our requests with a JSON-RPC error.
    #[error("JSON-RPC error (code {}): {}", .0.code, .0.message)]
    JsonRpc(ErrorData),

    /// An internal channel closed, usually because the transport went away.
    #[error("Internal communication channel closed")]
    ChannelClosed,

    /// Waiting for a response took longer than the configured timeout.
    #[error("Operation timed out")]
    Timeout,

    /// The operation is not valid in the session's current state.
    #[error("Unexpected state: {0}")]
    UnexpectedState(String),

    /// A resource URI template could not be parsed.
    #[error("Invalid URI template: {0}")]
    InvalidTemplate(String),

    /// A tool parameter schema could not be compiled.
    #[error("Invalid parameter schema: {0}")]
    InvalidSchema(String),

    #[error("An internal error occurred: {0}")]
    Other(String),
}

/// A specialized `Result` type for zapmcp.
pub type Result<T> = std::result::Result<T, Error>;

impl From<ErrorData> for Error {
    fn from(err: ErrorData) -> Self {
        Error::JsonRpc(err)
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::ChannelClosed
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}

/// An error whose message is shown to the client verbatim.
///
/// Return it from a tool body (`Err(UserError::new("...").into())`) to produce an
/// error-flagged result with exactly this text. Any other error is reported as
/// `"Error: <message>"`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct UserError {
    pub message: String,
}

impl UserError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
