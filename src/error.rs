//! Session error kinds
//!
//! Fatal errors route through session teardown; everything else becomes an
//! error response and the session stays open.

use crate::protocol::{ProtocolError, Response, STATUS_BAD_REQUEST};
use crate::registry::SessionId;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("invalid session id, {0} not connected")]
    UnknownSession(SessionId),
    #[error("connect not ready")]
    NotReady,
    #[error("params cannot be empty")]
    EmptyParams,
    #[error("invalid method: {0}")]
    UnknownMethod(i32),
    #[error("connect closed")]
    Closed,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Whether the session must be torn down
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Protocol(_) | SessionError::UnknownSession(_) | SessionError::Transport(_)
        )
    }

    /// HTTP-style status carried in the error response
    pub fn status(&self) -> u16 {
        STATUS_BAD_REQUEST
    }

    pub fn to_response(&self, id: SessionId) -> Response {
        Response::error(id, self.status(), self.to_string())
    }
}
