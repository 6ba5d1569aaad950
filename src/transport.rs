//! Duplex message transport
//!
//! A connection is split into a [`FrameSource`] owned by the session's
//! listener and a [`FrameSink`] owned by the session's control loop.
//!
//! # Implementations
//!
//! - [`WsSource`] / [`WsSink`] - WebSocket via tokio-tungstenite
//! - [`memory::pair`] - in-process channels for tests and embedding

pub mod memory;
mod websocket;

pub use websocket::{WsSink, WsSource, split};

use async_trait::async_trait;

/// Close code for a normal closure
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when a close frame carries no status
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Read half of a connection
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next data frame
    async fn next_frame(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// Write half of a connection
#[async_trait]
pub trait FrameSink: Send {
    /// Write one data frame
    async fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Transport failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Peer sent a close frame
    #[error("connection closed (code {})", .0.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    Closed(Option<u16>),
    /// Stream ended without a closing handshake
    #[error("connection reset without closing handshake")]
    Disconnected,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl TransportError {
    /// Expected closures are not worth reporting
    pub fn is_normal_closure(&self) -> bool {
        match self {
            TransportError::Closed(None) => true,
            TransportError::Closed(Some(code)) => {
                *code == CLOSE_NORMAL || *code == CLOSE_NO_STATUS
            }
            TransportError::WebSocket(tokio_tungstenite::tungstenite::Error::ConnectionClosed) => {
                true
            }
            _ => false,
        }
    }
}
