use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use super::{CacheBackend, CacheError};

/// Networked backend. Redis enforces the TTL itself, so reads need no expiry check.
#[derive(Clone)]
pub struct RedisBackend {
    connection: MultiplexedConnection,
}

impl RedisBackend {
    pub fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_tokio_connection().await?;
        Ok(Self::new(connection))
    }

    pub async fn is_connected(&self) -> bool {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        let payload: Option<String> = conn.get(key).await?;
        Ok(payload)
    }

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        if ttl.is_zero() {
            let _: () = conn.set(key, payload).await?;
        } else {
            let ttl_ms = (ttl.as_millis() as u64).max(1);
            let _: () = conn.pset_ex(key, payload, ttl_ms).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let _: u64 = conn.del(key).await?;
        Ok(())
    }
}
