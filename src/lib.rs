//! SubjectHub - realtime session hub with subject-pattern fan-out
//!
//! Accepts persistent client connections, tracks per-connection liveness,
//! lets each connection subscribe to subject patterns and relays upstream
//! bus events only to the connections whose patterns match.
//!
//! ## Architecture
//!
//! ```text
//! client frame → listener → inbound queue → session loop → transport
//! event bus → station → hub → broadcast queue → session loop → transport
//! ```
//!
//! Each session runs two tasks: a listener that reads the transport and a
//! control loop that owns all session state and is the only writer.

#[cfg(not(any(feature = "postgres", feature = "memory")))]
compile_error!("SubjectHub requires a pub/sub backend. Enable: --features memory OR --features postgres");

pub mod config;
pub mod error;
pub mod hub;
pub mod protocol;
pub mod pubsub;
pub mod registry;
pub mod session;
pub mod station;
pub mod subject;
pub mod transport;

pub use config::Config;
pub use error::SessionError;
pub use hub::Hub;
pub use protocol::{BroadcastEvent, Method, ProtocolError, Request, Response};
pub use pubsub::PubSub;
pub use registry::{SessionId, SessionRegistry};
pub use session::{Metadata, SessionHandle, SessionOptions};
pub use station::Station;
pub use transport::{FrameSink, FrameSource, TransportError};

#[cfg(feature = "postgres")]
pub use pubsub::PostgresPubSub;

#[cfg(feature = "memory")]
pub use pubsub::MemoryPubSub;
