use futures_util::StreamExt;
use matinee_protocol::PlaybackState;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{keys, Keyspace, KeyspaceError, SUBSCRIPTION_BUFFER};

/// Redis-backed keyspace. Commands go through a shared
/// [`ConnectionManager`]; each topic subscription gets its own pub/sub
/// connection so a slow subscriber cannot stall command traffic.
#[derive(Clone)]
pub struct RedisKeyspace {
    client: Client,
    redis: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisKeyspace {
    pub async fn connect(redis_url: &str, ttl_seconds: u64) -> Result<Self, KeyspaceError> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            redis,
            ttl_seconds,
        })
    }

    async fn delete_best_effort(&self, conn: &mut ConnectionManager, keys: &[String]) {
        for key in keys {
            if let Err(err) = conn.del::<_, ()>(key).await {
                warn!(%key, error = %err, "rollback delete failed");
            }
        }
    }
}

#[async_trait::async_trait]
impl Keyspace for RedisKeyspace {
    async fn create_session(
        &self,
        session_key: &str,
        host_token: &str,
        state: &PlaybackState,
    ) -> Result<(), KeyspaceError> {
        let mut conn = self.redis.clone();

        conn.set_ex::<_, _, ()>(keys::sentinel(session_key), "active", self.ttl_seconds)
            .await?;

        if let Err(err) = conn
            .set_ex::<_, _, ()>(keys::host_token(session_key), host_token, self.ttl_seconds)
            .await
        {
            self.delete_best_effort(&mut conn, &[keys::sentinel(session_key)])
                .await;
            return Err(err.into());
        }

        let payload = serde_json::to_string(state)?;
        if let Err(err) = conn
            .set_ex::<_, _, ()>(keys::state(session_key), payload, self.ttl_seconds)
            .await
        {
            self.delete_best_effort(
                &mut conn,
                &[keys::sentinel(session_key), keys::host_token(session_key)],
            )
            .await;
            return Err(err.into());
        }

        Ok(())
    }

    async fn session_exists(&self, session_key: &str) -> Result<bool, KeyspaceError> {
        let mut conn = self.redis.clone();
        let exists: bool = conn.exists(keys::sentinel(session_key)).await?;
        Ok(exists)
    }

    async fn host_token(&self, session_key: &str) -> Result<Option<String>, KeyspaceError> {
        let mut conn = self.redis.clone();
        let token: Option<String> = conn.get(keys::host_token(session_key)).await?;
        Ok(token)
    }

    async fn read_state(
        &self,
        session_key: &str,
    ) -> Result<Option<PlaybackState>, KeyspaceError> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(keys::state(session_key)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write_state(
        &self,
        session_key: &str,
        state: &PlaybackState,
    ) -> Result<(), KeyspaceError> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(state)?;
        conn.set_ex::<_, _, ()>(keys::state(session_key), payload, self.ttl_seconds)
            .await?;
        Ok(())
    }

    async fn publish_state(
        &self,
        session_key: &str,
        state: &PlaybackState,
    ) -> Result<(), KeyspaceError> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(state)?;
        conn.publish::<_, _, ()>(keys::topic(session_key), payload)
            .await?;
        Ok(())
    }

    async fn subscribe_state(
        &self,
        session_key: &str,
    ) -> Result<mpsc::Receiver<PlaybackState>, KeyspaceError> {
        let topic = keys::topic(session_key);
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&topic).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(%topic, error = %err, "unreadable topic payload");
                        continue;
                    }
                };
                let state: PlaybackState = match serde_json::from_str(&payload) {
                    Ok(state) => state,
                    Err(err) => {
                        warn!(%topic, error = %err, "discarding malformed topic payload");
                        continue;
                    }
                };
                if tx.send(state).await.is_err() {
                    break;
                }
            }
            debug!(%topic, "topic subscription ended");
        });

        Ok(rx)
    }
}
