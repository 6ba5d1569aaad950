//! In-memory pub/sub backend using tokio::sync::broadcast
//!
//! Single-node only. Upstream subscriptions are subject patterns, so a
//! station subscribed to `*` sees every published topic.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::warn;

use crate::pubsub::PubSub;
use crate::subject;

/// Default buffer size for the bus channel
const DEFAULT_BUFFER_SIZE: usize = 1024;

/// In-memory pub/sub
///
/// # Limitations
/// - Single-process only
/// - Events published before `listen` starts are lost
/// - Lagging listeners lose events
#[derive(Clone)]
pub struct MemoryPubSub {
    tx: broadcast::Sender<(String, Vec<u8>)>,
    patterns: Arc<RwLock<HashSet<String>>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Larger buffers reduce loss for slow listeners
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self {
            tx,
            patterns: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    async fn wants(&self, topic: &str) -> bool {
        self.patterns
            .read()
            .await
            .iter()
            .any(|pattern| subject::matches(pattern, topic))
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        // Err only means nobody is listening yet
        let _ = self.tx.send((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> anyhow::Result<()> {
        self.patterns.write().await.insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> anyhow::Result<()> {
        self.patterns.write().await.remove(topic);
        Ok(())
    }

    async fn listen<F>(&self, callback: F) -> anyhow::Result<()>
    where
        F: Fn(String, Vec<u8>) + Send + Sync + 'static,
    {
        let mut rx = self.tx.subscribe();

        loop {
            match rx.recv().await {
                Ok((topic, payload)) => {
                    if self.wants(&topic).await {
                        callback(topic, payload);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lost = n, "memory bus listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn spawn_listener(pubsub: &MemoryPubSub) -> (Arc<Mutex<Vec<String>>>, tokio::task::JoinHandle<()>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let listener = pubsub.clone();

        let handle = tokio::spawn(async move {
            let _ = listener
                .listen(move |topic, _payload| {
                    sink.lock().unwrap().push(topic);
                })
                .await;
        });

        (received, handle)
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let pubsub = MemoryPubSub::new();
        pubsub.subscribe("orders.*").await.unwrap();

        let (received, handle) = spawn_listener(&pubsub);
        tokio::time::sleep(Duration::from_millis(50)).await;

        pubsub.publish("orders.created", b"{}").await.unwrap();
        pubsub.publish("users.created", b"{}").await.unwrap();
        pubsub.publish("orders.paid", b"{}").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*received.lock().unwrap(), vec!["orders.created", "orders.paid"]);
        handle.abort();
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let pubsub = MemoryPubSub::new();
        pubsub.subscribe("*").await.unwrap();

        let (received, handle) = spawn_listener(&pubsub);
        tokio::time::sleep(Duration::from_millis(50)).await;

        pubsub.unsubscribe("*").await.unwrap();
        pubsub.publish("orders.created", b"{}").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(received.lock().unwrap().is_empty());
        handle.abort();
    }
}
