//! Client session
//!
//! A session represents a single client connection. Its mutable state is
//! owned by one control loop ([`actor`]) fed by three bounded queues:
//! inbound requests from the listener, outbound responses, and broadcast
//! events from the hub. The listener ([`listener`]) reads the transport and
//! only ever talks to the control loop through those queues.

mod actor;
mod listener;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::protocol::{BroadcastEvent, Request, Response};
use crate::registry::{SessionId, SessionRegistry};
use crate::subject;
use crate::transport::{FrameSink, FrameSource};

use actor::Actor;
use listener::Listener;

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Connection-scoped metadata
pub type Metadata = HashMap<String, String>;

/// Live sessions by id, as seen by the hub
pub(crate) type Directory = DashMap<SessionId, SessionHandle>;

/// Per-session tuning
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Readiness is revoked after this long without activity
    pub heartbeat: Duration,
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
    pub broadcast_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            heartbeat: DEFAULT_HEARTBEAT,
            inbound_capacity: 64,
            outbound_capacity: 64,
            broadcast_capacity: 256,
        }
    }
}

/// State shared between the control loop, the listener and handles
#[derive(Debug)]
pub(crate) struct SessionState {
    id: SessionId,
    header: Metadata,
    subscriptions: RwLock<HashSet<String>>,
    ready: AtomicBool,
    closed: AtomicBool,
}

impl SessionState {
    fn new(id: SessionId, header: Metadata) -> Self {
        Self {
            id,
            header,
            subscriptions: RwLock::new(HashSet::new()),
            ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> &SessionId {
        &self.id
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flip `closed`; true only for the first caller
    pub(crate) fn begin_teardown(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Current subscription patterns, sorted
    pub(crate) fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.subscriptions.read().iter().cloned().collect();
        topics.sort();
        topics
    }

    pub(crate) fn subscribe(&self, subjects: Vec<String>) {
        let mut subscriptions = self.subscriptions.write();
        subscriptions.extend(subjects);
    }

    pub(crate) fn unsubscribe(&self, subjects: &[String]) {
        let mut subscriptions = self.subscriptions.write();
        for subject in subjects {
            subscriptions.remove(subject);
        }
    }

    /// First pattern matching `topic`, if any
    pub(crate) fn first_match(&self, topic: &str) -> Option<String> {
        self.subscriptions
            .read()
            .iter()
            .find(|pattern| subject::matches(pattern, topic))
            .cloned()
    }
}

/// Handle to a running session
///
/// Cheap to clone. Dropping every handle does not stop the session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    state: Arc<SessionState>,
    broadcast: mpsc::Sender<BroadcastEvent>,
    closing: mpsc::Sender<()>,
    done: watch::Receiver<bool>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        self.state.id()
    }

    pub fn header(&self) -> &Metadata {
        &self.state.header
    }

    /// Header value (case-insensitive)
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.state
            .header
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Current subscription patterns, sorted
    pub fn topics(&self) -> Vec<String> {
        self.state.topics()
    }

    /// Queue an event without waiting
    pub fn deliver(&self, event: BroadcastEvent) -> Result<(), TrySendError<BroadcastEvent>> {
        self.broadcast.try_send(event)
    }

    /// Ask the session to tear down. Repeated calls are harmless.
    pub fn close(&self) {
        if self.state.is_closed() {
            return;
        }
        // A full queue means a close is already pending
        let _ = self.closing.try_send(());
    }

    /// Wait until teardown has finished
    pub async fn closed(&self) {
        let mut done = self.done.clone();
        // Err means the control loop is gone, which only happens after teardown
        let _ = done.wait_for(|finished| *finished).await;
    }
}

/// Start the listener and control loop for one connection
pub(crate) fn spawn<S, K>(
    id: SessionId,
    header: Metadata,
    source: S,
    sink: K,
    options: &SessionOptions,
    registry: Arc<SessionRegistry>,
    directory: Arc<Directory>,
) -> SessionHandle
where
    S: FrameSource + 'static,
    K: FrameSink + 'static,
{
    let state = Arc::new(SessionState::new(id.clone(), header));

    let (inbound_tx, inbound_rx) = mpsc::channel::<Request>(options.inbound_capacity.max(1));
    let (outbound_tx, outbound_rx) = mpsc::channel::<Response>(options.outbound_capacity.max(1));
    let (broadcast_tx, broadcast_rx) = mpsc::channel(options.broadcast_capacity.max(1));
    let (closing_tx, closing_rx) = mpsc::channel(1);
    let (done_tx, done_rx) = watch::channel(false);

    let handle = SessionHandle {
        state: state.clone(),
        broadcast: broadcast_tx,
        closing: closing_tx.clone(),
        done: done_rx,
    };
    directory.insert(id, handle.clone());

    let listener = Listener::new(
        state.clone(),
        source,
        registry.clone(),
        inbound_tx,
        outbound_tx,
        closing_tx,
    );
    let listener_task = tokio::spawn(listener.run());

    let actor = Actor {
        state,
        sink,
        heartbeat: options.heartbeat,
        inbound: inbound_rx,
        outbound: outbound_rx,
        broadcast: broadcast_rx,
        closing: closing_rx,
        registry,
        directory,
        listener: listener_task.abort_handle(),
        done: done_tx,
    };
    tokio::spawn(actor.run());

    handle
}
