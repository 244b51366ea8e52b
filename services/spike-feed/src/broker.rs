//! Cross-instance event broker
//!
//! Multi-instance fan-out rides one Redis pub/sub channel. Every instance
//! stamps its publishes with an origin id and applies messages from other
//! origins as if they were local publishes; its own messages are skipped
//! because the local hub already queued them. With no Redis configured, or
//! when the connect budget runs out, the broker degrades to local-only
//! mode rather than failing startup.

use std::time::Duration;

use futures::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use types::errors::BrokerError;

use crate::detector::SpikeAlert;
use crate::store::SymbolState;

/// Distribution reach, surfaced on the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionMode {
    Brokered,
    LocalOnly,
}

/// Event fanned out to every instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BrokerEvent {
    Snapshot { rows: Vec<SymbolState> },
    Alert { alert: SpikeAlert },
}

/// Wire wrapper carrying the publishing instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub origin: String,
    pub event: BrokerEvent,
}

/// Connected Redis client pair: multiplexed connection for publishing,
/// the client itself for spawning pub/sub listeners.
pub struct RedisBroker {
    client: redis::Client,
    conn: redis::aio::MultiplexedConnection,
    channel: String,
    instance_id: String,
}

impl RedisBroker {
    async fn publish(&self, event: &BrokerEvent) -> Result<(), BrokerError> {
        let message = BrokerMessage {
            origin: self.instance_id.clone(),
            event: event.clone(),
        };
        let payload = serde_json::to_string(&message).map_err(|e| BrokerError::Publish {
            detail: e.to_string(),
        })?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .publish(&self.channel, payload)
            .await
            .map_err(|e| BrokerError::Publish {
                detail: e.to_string(),
            })?;
        Ok(())
    }
}

/// Broker handle owned by the distribution hub.
pub enum Broker {
    Redis(RedisBroker),
    LocalOnly,
}

impl Broker {
    /// Connect within the budget; any failure degrades to local-only.
    pub async fn connect(
        redis_url: Option<&str>,
        connect_timeout: Duration,
        channel: &str,
        instance_id: &str,
    ) -> Self {
        let Some(url) = redis_url else {
            info!("No broker configured; distribution is local-only");
            return Broker::LocalOnly;
        };

        let client = match redis::Client::open(url) {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "Invalid broker URL; distribution is local-only");
                return Broker::LocalOnly;
            }
        };

        match tokio::time::timeout(connect_timeout, client.get_multiplexed_async_connection())
            .await
        {
            Ok(Ok(conn)) => {
                info!(channel, instance_id, "Connected to broker");
                Broker::Redis(RedisBroker {
                    client,
                    conn,
                    channel: channel.to_string(),
                    instance_id: instance_id.to_string(),
                })
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Broker connect failed; distribution is local-only");
                Broker::LocalOnly
            }
            Err(_) => {
                let waited_ms = connect_timeout.as_millis() as u64;
                warn!(
                    error = %BrokerError::ConnectTimeout { waited_ms },
                    "Broker connect timed out; distribution is local-only"
                );
                Broker::LocalOnly
            }
        }
    }

    pub fn local_only() -> Self {
        Broker::LocalOnly
    }

    pub fn mode(&self) -> DistributionMode {
        match self {
            Broker::Redis(_) => DistributionMode::Brokered,
            Broker::LocalOnly => DistributionMode::LocalOnly,
        }
    }

    /// Publish an event to all other instances. Local-only mode is a no-op
    /// success: the local hub has already queued the event.
    pub async fn publish(&self, event: &BrokerEvent) -> Result<(), BrokerError> {
        match self {
            Broker::Redis(redis) => redis.publish(event).await,
            Broker::LocalOnly => Ok(()),
        }
    }

    /// Spawn the subscription task feeding remote events into `tx`.
    ///
    /// Reconnects with a flat delay if the subscription drops; exits once
    /// the receiving side is gone. No-op in local-only mode.
    pub fn spawn_listener(&self, tx: mpsc::Sender<BrokerEvent>) {
        let Broker::Redis(redis) = self else {
            return;
        };
        let client = redis.client.clone();
        let channel = redis.channel.clone();
        let own_origin = redis.instance_id.clone();

        tokio::spawn(async move {
            loop {
                if let Err(e) = listen_once(&client, &channel, &own_origin, &tx).await {
                    warn!(error = %e, "Broker subscription lost; retrying");
                }
                if tx.is_closed() {
                    return;
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });
    }
}

async fn listen_once(
    client: &redis::Client,
    channel: &str,
    own_origin: &str,
    tx: &mpsc::Sender<BrokerEvent>,
) -> Result<(), BrokerError> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| BrokerError::Subscribe {
            detail: e.to_string(),
        })?;
    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| BrokerError::Subscribe {
            detail: e.to_string(),
        })?;
    info!(channel, "Subscribed to broker channel");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Undecodable broker payload");
                continue;
            }
        };
        let message: BrokerMessage = match serde_json::from_str(&payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Malformed broker message");
                continue;
            }
        };
        // Own messages were already delivered locally at publish time.
        if message.origin == own_origin {
            continue;
        }
        if tx.send(message.event).await.is_err() {
            return Ok(());
        }
    }
    Ok(())
}
