//! Broadcast station
//!
//! Relays upstream bus events into every live session's broadcast queue.
//! Which sessions actually receive an event is decided by each session's
//! own subscriptions.

use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::hub::Hub;
use crate::protocol::BroadcastEvent;
use crate::pubsub::PubSub;

/// Running relay from a bus to a hub
#[derive(Debug)]
pub struct Station {
    topics: Vec<String>,
    task: JoinHandle<()>,
}

impl Station {
    /// Subscribe to `topics` upstream and start relaying
    pub async fn start<P>(pubsub: Arc<P>, hub: Arc<Hub>, topics: &[String]) -> anyhow::Result<Self>
    where
        P: PubSub + 'static,
    {
        for topic in topics {
            pubsub
                .subscribe(topic)
                .await
                .with_context(|| format!("failed to subscribe to {}", topic))?;
        }

        let task = tokio::spawn(async move {
            info!("Starting station listener");
            if let Err(e) = pubsub
                .listen(move |topic, payload| {
                    relay(&hub, topic, &payload);
                })
                .await
            {
                error!(error = %e, "Station listener error");
            }
        });

        info!(topics = ?topics, "Station started");
        Ok(Self {
            topics: topics.to_vec(),
            task,
        })
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Stop relaying
    pub fn shutdown(self) {
        self.task.abort();
        debug!("Station stopped");
    }
}

/// Timestamp one bus event and queue it on every live session
pub fn relay(hub: &Hub, topic: String, payload: &[u8]) -> usize {
    let event = BroadcastEvent::from_bus(topic, payload);
    hub.broadcast(&event)
}
