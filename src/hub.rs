//! Session hub
//!
//! Owns the session registry and the directory of live sessions. New
//! connections are turned into sessions here, and upstream events are fanned
//! out to every session's broadcast queue. Subject matching happens inside
//! each session.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::protocol::BroadcastEvent;
use crate::registry::{SessionId, SessionRegistry};
use crate::session::{self, Directory, Metadata, SessionHandle, SessionOptions};
use crate::transport::{FrameSink, FrameSource};

/// Hub manages all sessions
pub struct Hub {
    registry: Arc<SessionRegistry>,
    sessions: Arc<Directory>,
    options: SessionOptions,
}

impl Hub {
    /// Create a new Hub
    pub fn new(options: SessionOptions) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            sessions: Arc::new(DashMap::new()),
            options,
        }
    }

    /// Shared session id registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Options applied to every new session
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Reserve a fresh session id
    pub fn register(&self) -> SessionId {
        self.registry.create()
    }

    /// Start a session for an id obtained from [`Hub::register`]
    pub fn spawn_session<S, K>(
        &self,
        id: SessionId,
        header: Metadata,
        source: S,
        sink: K,
    ) -> SessionHandle
    where
        S: FrameSource + 'static,
        K: FrameSink + 'static,
    {
        debug!(session_id = %id, "session started");
        session::spawn(
            id,
            header,
            source,
            sink,
            &self.options,
            self.registry.clone(),
            self.sessions.clone(),
        )
    }

    /// Register and start a session in one step
    pub fn open<S, K>(&self, header: Metadata, source: S, sink: K) -> SessionHandle
    where
        S: FrameSource + 'static,
        K: FrameSink + 'static,
    {
        let id = self.register();
        self.spawn_session(id, header, source, sink)
    }

    /// Check whether `id` belongs to a live session
    pub fn verify(&self, id: &SessionId) -> bool {
        self.registry.verify(id)
    }

    /// Get a live session by id
    pub fn get_session(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Queue `event` on every live session without blocking.
    ///
    /// A session whose broadcast queue is full loses this event; nobody else
    /// is held up. Returns the number of sessions the event was queued for.
    pub fn broadcast(&self, event: &BroadcastEvent) -> usize {
        let mut delivered = 0;

        for entry in self.sessions.iter() {
            match entry.value().deliver(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(session_id = %entry.key(), subject = %event.subject, "broadcast queue full, event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(session_id = %entry.key(), subject = %event.subject, "session closing, event skipped");
                }
            }
        }

        debug!(subject = %event.subject, receivers = delivered, "broadcast sent");
        delivered
    }

    /// Ask every live session to tear down
    pub fn close_all(&self) {
        let handles: Vec<SessionHandle> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();

        info!(sessions = handles.len(), "closing all sessions");
        for handle in handles {
            handle.close();
        }
    }

    /// Get session count
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("sessions", &self.sessions.len())
            .field("registered", &self.registry.len())
            .finish()
    }
}
