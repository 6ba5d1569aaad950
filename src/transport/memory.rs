//! In-process transport
//!
//! Both directions are unbounded channels. The client half plays the part of
//! a remote peer: it writes request frames, reads response frames and can
//! close with a status code.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{CLOSE_NORMAL, FrameSink, FrameSource, TransportError};
use crate::protocol::Response;

#[derive(Debug)]
enum ClientFrame {
    Data(Vec<u8>),
    Close(Option<u16>),
}

/// Server read half
#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<ClientFrame>,
}

/// Server write half
#[derive(Debug)]
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

/// Remote peer
#[derive(Debug)]
pub struct MemoryClient {
    tx: mpsc::UnboundedSender<ClientFrame>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Create a connected transport
pub fn pair() -> (MemorySource, MemorySink, MemoryClient) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();

    (
        MemorySource { rx: server_rx },
        MemorySink { tx: Some(server_tx) },
        MemoryClient {
            tx: client_tx,
            rx: client_rx,
        },
    )
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        match self.rx.recv().await {
            Some(ClientFrame::Data(data)) => Ok(data),
            Some(ClientFrame::Close(code)) => Err(TransportError::Closed(code)),
            None => Err(TransportError::Disconnected),
        }
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed(Some(CLOSE_NORMAL)))?;
        tx.send(frame).map_err(|_| TransportError::Disconnected)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx.take();
        Ok(())
    }
}

impl MemoryClient {
    /// Send a raw frame; false once the server side is gone
    pub fn send(&self, frame: impl Into<Vec<u8>>) -> bool {
        self.tx.send(ClientFrame::Data(frame.into())).is_ok()
    }

    /// Serialize and send a JSON value
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        match serde_json::to_vec(value) {
            Ok(frame) => self.send(frame),
            Err(_) => false,
        }
    }

    /// Send a close frame
    pub fn close(&self, code: Option<u16>) -> bool {
        self.tx.send(ClientFrame::Close(code)).is_ok()
    }

    /// Next frame written by the server, `None` once it closed
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Next frame decoded as a response
    pub async fn recv_response(&mut self) -> Option<Response> {
        let frame = self.recv().await?;
        serde_json::from_slice(&frame).ok()
    }

    /// Pending frame without waiting
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }
}
