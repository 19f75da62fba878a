//! Cache facade over a swappable key/value backend.
//!
//! Values are stored as JSON text so every backend sees the same
//! serialization-neutral payload. A zero TTL means "no expiry".

pub mod keys;
mod memory;
mod redis_backend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Uses redis when a URL is given and reachable, the in-process map otherwise.
    pub async fn connect(redis_url: Option<&str>) -> Self {
        let Some(url) = redis_url.filter(|u| !u.trim().is_empty()) else {
            return Self::in_memory();
        };

        match RedisBackend::connect(url).await {
            Ok(backend) if backend.is_connected().await => {
                tracing::info!("cache backed by redis");
                Self::new(Arc::new(backend))
            }
            Ok(_) => {
                tracing::warn!("redis did not answer PING, using in-process cache");
                Self::in_memory()
            }
            Err(err) => {
                tracing::warn!(error = %err, "redis unavailable, using in-process cache");
                Self::in_memory()
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let payload = match self.backend.get(key).await {
            Ok(payload) => payload?,
            Err(err) => {
                tracing::warn!(error = %err, key, "cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(error = %err, key, "dropping undecodable cache entry");
                None
            }
        }
    }

    pub async fn set<T>(&self, key: &str, value: &T, ttl: Duration)
    where
        T: Serialize,
    {
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(error = %err, key, "cache value not serializable");
                return;
            }
        };

        if let Err(err) = self.backend.set(key, payload, ttl).await {
            tracing::warn!(error = %err, key, "cache write failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(err) = self.backend.delete(key).await {
            tracing::warn!(error = %err, key, "cache delete failed");
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::in_memory()
    }
}
