//! Session control loop
//!
//! The only task that mutates session state or writes to the transport.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

use super::{Directory, SessionState};
use crate::error::SessionError;
use crate::protocol::{self, BroadcastEvent, Method, Request, Response};
use crate::registry::SessionRegistry;
use crate::transport::FrameSink;

pub(super) struct Actor<K> {
    pub(super) state: Arc<SessionState>,
    pub(super) sink: K,
    pub(super) heartbeat: Duration,
    pub(super) inbound: mpsc::Receiver<Request>,
    pub(super) outbound: mpsc::Receiver<Response>,
    pub(super) broadcast: mpsc::Receiver<BroadcastEvent>,
    pub(super) closing: mpsc::Receiver<()>,
    pub(super) registry: Arc<SessionRegistry>,
    pub(super) directory: Arc<Directory>,
    pub(super) listener: AbortHandle,
    pub(super) done: watch::Sender<bool>,
}

impl<K: FrameSink> Actor<K> {
    pub(super) async fn run(mut self) {
        loop {
            let flow = tokio::select! {
                Some(response) = self.outbound.recv() => self.write(response).await,
                Some(request) = self.inbound.recv() => self.dispatch(request).await,
                _ = self.closing.recv() => ControlFlow::Break(()),
                Some(event) = self.broadcast.recv() => self.event(event).await,
                _ = tokio::time::sleep(self.heartbeat) => {
                    if self.state.is_ready() {
                        self.state.set_ready(false);
                        debug!(session_id = %self.state.id(), "no heartbeat");
                    }
                    ControlFlow::Continue(())
                }
            };

            if flow.is_break() {
                break;
            }
        }

        self.flush().await;
        self.teardown().await;
    }

    /// Write responses still queued when the loop stops. The listener queues
    /// the error for a fatal condition before it signals close.
    async fn flush(&mut self) {
        while let Ok(response) = self.outbound.try_recv() {
            if self.write(response).await.is_break() {
                break;
            }
        }
    }

    async fn dispatch(&mut self, request: Request) -> ControlFlow<()> {
        match request.method {
            Method::Ping => self.ping().await,
            Method::Subscribe => self.subscribe(&request).await,
            Method::Unsubscribe => self.unsubscribe(&request).await,
            Method::Disconnect => ControlFlow::Break(()),
            other => {
                let err = SessionError::UnknownMethod(other.code());
                self.write(err.to_response(self.state.id().clone())).await
            }
        }
    }

    async fn ping(&mut self) -> ControlFlow<()> {
        if self.state.is_closed() {
            return ControlFlow::Continue(());
        }

        self.state.set_ready(true);
        self.normal(Method::Ping, Value::String(protocol::now())).await
    }

    async fn subscribe(&mut self, request: &Request) -> ControlFlow<()> {
        let subjects = match request.subjects() {
            Ok(subjects) => subjects,
            Err(e) => {
                error!(session_id = %self.state.id(), error = %e, "subscribe failed");
                return self.reject(e.into()).await;
            }
        };

        self.state.subscribe(subjects);
        self.normal(Method::Subscribe, json!(self.state.topics())).await
    }

    async fn unsubscribe(&mut self, request: &Request) -> ControlFlow<()> {
        let subjects = match request.subjects() {
            Ok(subjects) => subjects,
            Err(e) => {
                error!(session_id = %self.state.id(), error = %e, "unsubscribe failed");
                return self.reject(e.into()).await;
            }
        };

        self.state.unsubscribe(&subjects);
        self.normal(Method::Unsubscribe, json!(self.state.topics())).await
    }

    /// Deliver a broadcast on the first matching subscription only
    async fn event(&mut self, mut event: BroadcastEvent) -> ControlFlow<()> {
        if !self.state.is_ready() {
            debug!(session_id = %self.state.id(), subject = %event.subject, "event skipped, connect not ready");
            return ControlFlow::Continue(());
        }

        event.stamp();

        let Some(pattern) = self.state.first_match(&event.subject) else {
            return ControlFlow::Continue(());
        };
        debug!(session_id = %self.state.id(), subject = %event.subject, pattern = %pattern, "event matched");

        match serde_json::to_value(&event) {
            Ok(data) => self.normal(Method::Broadcast, data).await,
            Err(e) => {
                error!(session_id = %self.state.id(), error = %e, "failed to encode event");
                ControlFlow::Continue(())
            }
        }
    }

    async fn normal(&mut self, method: Method, data: Value) -> ControlFlow<()> {
        let response = Response::normal(self.state.id().clone(), method, data);
        self.write(response).await
    }

    /// Error reply followed by teardown
    async fn reject(&mut self, err: SessionError) -> ControlFlow<()> {
        let response = err.to_response(self.state.id().clone());
        let _ = self.write(response).await;
        ControlFlow::Break(())
    }

    /// Write a response to the transport.
    ///
    /// Successful responses need a ready session and are dropped otherwise.
    /// Error responses are always written while the session is open.
    async fn write(&mut self, mut response: Response) -> ControlFlow<()> {
        if self.state.is_closed() {
            return ControlFlow::Continue(());
        }

        if response.is_success() && !self.state.is_ready() {
            debug!(session_id = %self.state.id(), "write failed. connect not ready.");
            return ControlFlow::Continue(());
        }

        response.id = self.state.id().clone();
        let frame = match protocol::encode(&response) {
            Ok(frame) => frame,
            Err(e) => {
                error!(session_id = %self.state.id(), error = %e, "failed to encode response");
                return ControlFlow::Continue(());
            }
        };

        debug!(session_id = %self.state.id(), method = ?response.method, code = response.code, "[w]");
        if let Err(e) = self.sink.send_frame(frame).await {
            if e.is_normal_closure() {
                debug!(session_id = %self.state.id(), error = %e, "write on closed connection");
            } else {
                warn!(session_id = %self.state.id(), error = %e, "write failed");
            }
            return ControlFlow::Break(());
        }

        ControlFlow::Continue(())
    }

    async fn teardown(mut self) {
        self.state.set_ready(false);
        if !self.state.begin_teardown() {
            return;
        }

        let id = self.state.id().clone();
        debug!(session_id = %id, "disconnected");

        self.registry.remove(&id);
        self.directory.remove(&id);

        self.inbound.close();
        self.outbound.close();
        self.broadcast.close();
        self.closing.close();
        self.listener.abort();

        if let Err(e) = self.sink.close().await {
            debug!(session_id = %id, error = %e, "transport close failed");
        }

        let _ = self.done.send(true);
    }
}
