//! Event bus backends
//!
//! The station consumes upstream events through the [`PubSub`] trait. The
//! hub never manages the bus connection itself.
//!
//! # Features
//!
//! - `memory` - in-process bus for single-node deployments and tests (default)
//! - `postgres` - PostgreSQL LISTEN/NOTIFY

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PostgresPubSub;

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "memory")]
pub use memory::MemoryPubSub;

use async_trait::async_trait;

/// Pub/Sub backend trait
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish a payload on a topic
    async fn publish(&self, topic: &str, payload: &[u8]) -> anyhow::Result<()>;

    /// Start receiving events for a topic
    async fn subscribe(&self, topic: &str) -> anyhow::Result<()>;

    /// Stop receiving events for a topic
    async fn unsubscribe(&self, topic: &str) -> anyhow::Result<()>;

    /// Run the receive loop, invoking `callback(topic, payload)` per event.
    ///
    /// Runs until the bus goes away; spawn it as a background task.
    async fn listen<F>(&self, callback: F) -> anyhow::Result<()>
    where
        F: Fn(String, Vec<u8>) + Send + Sync + 'static;
}
