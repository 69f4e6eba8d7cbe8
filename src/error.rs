//! Error taxonomy.
//!
//! Per-connection failures end up as [`ConnectionError`] and never leave the
//! connection task. Only [`ServerError`] is surfaced to whoever starts the
//! server.

use std::net::SocketAddr;

use thiserror::Error;

use crate::http::parser::ParseError;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("malformed request: {0}")]
    MalformedRequest(ParseError),

    #[error("request head too large: {0}")]
    HeaderTooLarge(ParseError),

    #[error("request body too large: {0}")]
    BodyTooLarge(ParseError),

    #[error("client disconnected before the request was complete")]
    ClientDisconnected,

    #[error("timed out waiting for client data")]
    Timeout,

    #[error("no handler registered for {0}")]
    NoHandler(String),

    #[error("handler failed: {0}")]
    HandlerFailure(anyhow::Error),

    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ParseError> for ConnectionError {
    fn from(err: ParseError) -> Self {
        if matches!(err, ParseError::BodyTooLarge { .. }) {
            ConnectionError::BodyTooLarge(err)
        } else if err.is_too_large() {
            ConnectionError::HeaderTooLarge(err)
        } else {
            ConnectionError::MalformedRequest(err)
        }
    }
}

impl ConnectionError {
    /// True for failures caused by the peer rather than by the server or a
    /// handler.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ConnectionError::MalformedRequest(_)
                | ConnectionError::HeaderTooLarge(_)
                | ConnectionError::BodyTooLarge(_)
                | ConnectionError::ClientDisconnected
                | ConnectionError::Timeout
        )
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server is already listening on {0}")]
    AlreadyRunning(SocketAddr),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
