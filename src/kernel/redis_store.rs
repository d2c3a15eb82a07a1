//! Redis-backed [`StateStore`].
//!
//! The reference backend: queues are lists, user data is a hash, holds are a
//! set plus a per-user hash with `EXPIRE`, topics are pub/sub channels, and
//! [`StateStore::atomically`] maps onto `MULTI`/`EXEC` pipelines. Commands go
//! through a shared [`ConnectionManager`]; each subscription gets its own
//! pub/sub connection forwarding into an unbounded channel.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Pipeline};
use tokio::sync::mpsc;

use super::state_store::{keys, StateOp, StateStore, StoreError};

pub struct RedisStore {
    client: Client,
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(unavailable)?;
        Ok(Self { client, conn })
    }

    fn apply_to_pipe(pipe: &mut Pipeline, op: &StateOp) {
        match op {
            StateOp::Append { queue, id } => {
                pipe.rpush(queue, id).ignore();
            }
            StateOp::PushHead { queue, id } => {
                pipe.lpush(queue, id).ignore();
            }
            StateOp::RemoveValue { queue, id } => {
                pipe.lrem(queue, 0, id).ignore();
            }
            StateOp::PutUserData { id, entry } => {
                pipe.hset(keys::USERS_DATA, id, entry).ignore();
            }
            StateOp::DeleteUserData { id } => {
                pipe.hdel(keys::USERS_DATA, id).ignore();
            }
            StateOp::AddHold {
                language,
                id,
                entry,
                ttl,
            } => {
                let set_key = keys::hold_set(language);
                let data_key = keys::hold_data(id);
                let ttl_secs = ttl.as_secs() as i64;
                pipe.sadd(&set_key, id).ignore();
                pipe.expire(&set_key, ttl_secs).ignore();
                pipe.hset(&data_key, "data", entry).ignore();
                pipe.expire(&data_key, ttl_secs).ignore();
            }
            StateOp::RemoveHold { language, id } => {
                pipe.srem(keys::hold_set(language), id).ignore();
                pipe.del(keys::hold_data(id)).ignore();
            }
            StateOp::Publish { topic, payload } => {
                pipe.publish(topic, payload).ignore();
            }
        }
    }
}

fn unavailable(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[async_trait]
impl StateStore for RedisStore {
    async fn append(&self, queue: &str, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(queue, id).await.map_err(unavailable)?;
        Ok(())
    }

    async fn push_head(&self, queue: &str, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(queue, id).await.map_err(unavailable)?;
        Ok(())
    }

    async fn pop_head(&self, queue: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.lpop(queue, None).await.map_err(unavailable)
    }

    async fn head(&self, queue: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.lindex(queue, 0).await.map_err(unavailable)
    }

    async fn remove_value(&self, queue: &str, id: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.lrem(queue, 0, id).await.map_err(unavailable)?;
        Ok(removed.max(0) as u64)
    }

    async fn put_user_data(&self, id: &str, entry: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(keys::USERS_DATA, id, entry)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn user_data(&self, id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.hget(keys::USERS_DATA, id).await.map_err(unavailable)
    }

    async fn delete_user_data(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hdel(keys::USERS_DATA, id)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn user_data_exists(&self, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        conn.hexists(keys::USERS_DATA, id).await.map_err(unavailable)
    }

    async fn hold_data(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.hget(keys::hold_data(user_id), "data")
            .await
            .map_err(unavailable)
    }

    async fn remove_hold(&self, language: &str, user_id: &str) -> Result<(), StoreError> {
        self.atomically(vec![StateOp::RemoveHold {
            language: language.to_string(),
            id: user_id.to_string(),
        }])
        .await
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(topic, payload).await.map_err(unavailable)?;
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<mpsc::UnboundedReceiver<String>, StoreError> {
        let mut pubsub =
            self.client
                .get_async_pubsub()
                .await
                .map_err(|e| StoreError::Subscribe {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })?;
        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| StoreError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let topic = topic.to_string();
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(topic = %topic, error = %e, "undecodable pub/sub payload");
                    }
                }
            }
            tracing::debug!(topic = %topic, "pub/sub stream closed");
        });

        Ok(rx)
    }

    async fn atomically(&self, ops: Vec<StateOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            Self::apply_to_pipe(&mut pipe, op);
        }
        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
