//! PostgreSQL pub/sub backend using LISTEN/NOTIFY
//!
//! Topics map onto sanitized channel names. Payloads travel base64 encoded
//! because NOTIFY payloads must be text. Only literal topics can be
//! subscribed; patterns are rejected.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::{RwLock, mpsc};
use tokio::time::Duration;
use tokio_postgres::{AsyncMessage, Client, NoTls, Notification};
use tracing::{debug, error, info, warn};

use crate::pubsub::PubSub;

/// PostgreSQL-backed pub/sub
pub struct PostgresPubSub {
    connection_string: String,
    /// channel -> original topic
    channels: Arc<RwLock<HashMap<String, String>>>,
}

impl PostgresPubSub {
    /// Connect once to validate the connection string
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let client = Self::connect(database_url).await?;
        client
            .execute("SELECT 1", &[])
            .await
            .context("postgres connectivity check failed")?;

        Ok(Self {
            connection_string: database_url.to_string(),
            channels: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    async fn connect(database_url: &str) -> anyhow::Result<Client> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .context("failed to connect to postgres")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres connection error");
            }
        });

        Ok(client)
    }

    /// Channel names must be valid identifiers. Unquoted identifiers are
    /// folded to lower case by the server, so `LISTEN` and `pg_notify` only
    /// agree on lower-case names.
    fn sanitize_channel(topic: &str) -> String {
        let sanitized: String = topic
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();

        match sanitized.chars().next() {
            Some(c) if !c.is_ascii_digit() => sanitized,
            _ => format!("ch_{}", sanitized),
        }
    }

    /// Map `topic` onto its channel, refusing a channel already bound to a
    /// different topic
    fn bind_channel(channels: &mut HashMap<String, String>, topic: &str) -> anyhow::Result<String> {
        let channel = Self::sanitize_channel(topic);
        match channels.get(&channel) {
            Some(bound) if bound != topic => {
                anyhow::bail!(
                    "topic {} maps to channel {} already used by {}",
                    topic,
                    channel,
                    bound
                );
            }
            Some(_) => {}
            None => {
                channels.insert(channel.clone(), topic.to_string());
            }
        }
        Ok(channel)
    }

    /// Release `topic`'s channel if it is bound to that topic
    fn unbind_channel(channels: &mut HashMap<String, String>, topic: &str) -> bool {
        let channel = Self::sanitize_channel(topic);
        if channels.get(&channel).is_some_and(|bound| bound == topic) {
            channels.remove(&channel);
            return true;
        }
        false
    }

    async fn run_listener<F>(
        connection_string: &str,
        channels: &Arc<RwLock<HashMap<String, String>>>,
        callback: &Arc<F>,
    ) -> anyhow::Result<()>
    where
        F: Fn(String, Vec<u8>) + Send + Sync + 'static,
    {
        let (client, mut connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .context("failed to connect listener")?;

        // The connection has to be polled for queries to make progress, so it
        // gets its own task and hands notifications back over a channel.
        let (tx, mut notifications) = mpsc::unbounded_channel::<Notification>();
        tokio::spawn(async move {
            loop {
                match std::future::poll_fn(|cx| connection.poll_message(cx)).await {
                    Some(Ok(AsyncMessage::Notification(notification))) => {
                        if tx.send(notification).is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "listener connection error");
                        break;
                    }
                    None => break,
                }
            }
        });

        let mut listening: HashMap<String, String> = HashMap::new();

        loop {
            let wanted = channels.read().await.clone();
            for channel in wanted.keys() {
                if !listening.contains_key(channel) {
                    client.batch_execute(&format!("LISTEN {}", channel)).await?;
                    info!(channel = %channel, "listening");
                }
            }
            for channel in listening.keys() {
                if !wanted.contains_key(channel) {
                    client.batch_execute(&format!("UNLISTEN {}", channel)).await?;
                    info!(channel = %channel, "stopped listening");
                }
            }
            listening = wanted;

            tokio::select! {
                notification = notifications.recv() => {
                    let Some(notification) = notification else {
                        anyhow::bail!("connection closed");
                    };
                    let Some(topic) = listening.get(notification.channel()) else {
                        continue;
                    };
                    match STANDARD.decode(notification.payload()) {
                        Ok(payload) => callback(topic.clone(), payload),
                        Err(e) => warn!(channel = notification.channel(), error = %e, "undecodable notification"),
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(30)) => {
                    client.execute("SELECT 1", &[]).await.context("keepalive failed")?;
                }
            }
        }
    }
}

#[async_trait]
impl PubSub for PostgresPubSub {
    async fn publish(&self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        let client = Self::connect(&self.connection_string).await?;
        let channel = Self::sanitize_channel(topic);

        client
            .execute("SELECT pg_notify($1, $2)", &[&channel, &STANDARD.encode(payload)])
            .await
            .with_context(|| format!("failed to notify {}", channel))?;

        debug!(topic, channel = %channel, "published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> anyhow::Result<()> {
        if topic.ends_with('*') {
            anyhow::bail!("postgres backend cannot subscribe to pattern {}", topic);
        }

        let mut channels = self.channels.write().await;
        let channel = Self::bind_channel(&mut channels, topic)?;
        debug!(topic, channel = %channel, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> anyhow::Result<()> {
        let mut channels = self.channels.write().await;
        if !Self::unbind_channel(&mut channels, topic) {
            debug!(topic, "unsubscribe for unknown topic ignored");
        }
        Ok(())
    }

    async fn listen<F>(&self, callback: F) -> anyhow::Result<()>
    where
        F: Fn(String, Vec<u8>) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);

        loop {
            if let Err(e) =
                Self::run_listener(&self.connection_string, &self.channels, &callback).await
            {
                error!(error = %e, "listener error, reconnecting");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_channel() {
        assert_eq!(PostgresPubSub::sanitize_channel("orders"), "orders");
        assert_eq!(PostgresPubSub::sanitize_channel("orders.created"), "orders_created");
        assert_eq!(PostgresPubSub::sanitize_channel("7days"), "ch_7days");
        assert_eq!(PostgresPubSub::sanitize_channel(""), "ch_");
    }

    #[test]
    fn test_channel_is_lower_case() {
        assert_eq!(PostgresPubSub::sanitize_channel("Orders"), "orders");
        assert_eq!(PostgresPubSub::sanitize_channel("Users.Created"), "users_created");
    }

    #[test]
    fn test_mixed_case_topic_keeps_original_name() {
        let mut channels = HashMap::new();
        let channel = PostgresPubSub::bind_channel(&mut channels, "Orders").unwrap();

        // Notifications arrive on the folded name and map back to the topic
        assert_eq!(channel, "orders");
        assert_eq!(channels.get("orders").map(String::as_str), Some("Orders"));
    }

    #[test]
    fn test_colliding_topics_are_rejected() {
        let mut channels = HashMap::new();
        PostgresPubSub::bind_channel(&mut channels, "a.b").unwrap();

        assert!(PostgresPubSub::bind_channel(&mut channels, "a_b").is_err());
        assert!(PostgresPubSub::bind_channel(&mut channels, "A.B").is_err());
        assert_eq!(channels.get("a_b").map(String::as_str), Some("a.b"));

        // Same topic again is fine
        assert!(PostgresPubSub::bind_channel(&mut channels, "a.b").is_ok());
        assert_eq!(channels.len(), 1);
    }

    #[test]
    fn test_unbind_leaves_other_topic_alone() {
        let mut channels = HashMap::new();
        PostgresPubSub::bind_channel(&mut channels, "a.b").unwrap();

        assert!(!PostgresPubSub::unbind_channel(&mut channels, "a_b"));
        assert_eq!(channels.len(), 1);
        assert!(PostgresPubSub::unbind_channel(&mut channels, "a.b"));
        assert!(channels.is_empty());
    }

    #[test]
    fn test_payload_encoding() {
        let encoded = STANDARD.encode(br#"{"order":7}"#);
        assert_eq!(STANDARD.decode(encoded).unwrap(), br#"{"order":7}"#);
    }
}
