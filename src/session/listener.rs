//! Ingress listener
//!
//! Reads frames off the transport, runs admission checks and forwards
//! accepted requests to the control loop. Never writes to the transport
//! and never changes session state itself.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::SessionState;
use crate::error::SessionError;
use crate::protocol::{self, Method, Request, Response};
use crate::registry::SessionRegistry;
use crate::transport::FrameSource;

pub(super) struct Listener<S> {
    state: Arc<SessionState>,
    source: S,
    registry: Arc<SessionRegistry>,
    inbound: mpsc::Sender<Request>,
    outbound: mpsc::Sender<Response>,
    closing: mpsc::Sender<()>,
}

impl<S: FrameSource> Listener<S> {
    pub(super) fn new(
        state: Arc<SessionState>,
        source: S,
        registry: Arc<SessionRegistry>,
        inbound: mpsc::Sender<Request>,
        outbound: mpsc::Sender<Response>,
        closing: mpsc::Sender<()>,
    ) -> Self {
        Self {
            state,
            source,
            registry,
            inbound,
            outbound,
            closing,
        }
    }

    pub(super) async fn run(mut self) {
        loop {
            let frame = match self.source.next_frame().await {
                Ok(frame) => frame,
                Err(e) => {
                    if !e.is_normal_closure() {
                        error!(session_id = %self.state.id(), error = %e, "read message error");
                        self.report(&SessionError::Transport(e)).await;
                    }
                    self.close();
                    return;
                }
            };

            let request = match protocol::parse_request(&frame) {
                Ok(request) => request,
                Err(e) => {
                    error!(session_id = %self.state.id(), error = %e, "read message error");
                    self.report(&SessionError::Protocol(e)).await;
                    self.close();
                    return;
                }
            };

            match self.admit(&request) {
                Ok(()) => {}
                Err(err @ SessionError::Closed) => {
                    self.report(&err).await;
                    return;
                }
                Err(err) if err.is_fatal() => {
                    self.report(&err).await;
                    self.close();
                    return;
                }
                Err(err) => {
                    debug!(session_id = %self.state.id(), method = %request.method, error = %err, "request rejected");
                    self.report(&err).await;
                    continue;
                }
            }

            debug!(session_id = %self.state.id(), method = %request.method, "[r]");
            // Blocks while the inbound queue is full
            if self.inbound.send(request).await.is_err() {
                return;
            }
        }
    }

    /// Admission checks, in order
    fn admit(&self, request: &Request) -> Result<(), SessionError> {
        if !self.registry.verify(&request.id) {
            return Err(SessionError::UnknownSession(request.id.clone()));
        }

        if self.state.is_closed() {
            return Err(SessionError::Closed);
        }

        if request.method == Method::Ping {
            return Ok(());
        }

        if !self.state.is_ready() {
            return Err(SessionError::NotReady);
        }

        if !request.has_params() {
            return Err(SessionError::EmptyParams);
        }

        Ok(())
    }

    async fn report(&mut self, err: &SessionError) {
        let response = err.to_response(self.state.id().clone());
        // Fails only once the control loop has torn down
        let _ = self.outbound.send(response).await;
    }

    fn close(&self) {
        let _ = self.closing.try_send(());
    }
}
