use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;

use super::{CacheBackend, CacheError};

struct Entry {
    payload: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process backend. Expired entries are dropped when read, never swept.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.payload.clone())),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        self.entries
            .write()
            .insert(key.to_string(), Entry { payload, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_removed_on_read() {
        let backend = MemoryBackend::new();
        backend
            .set("a", "1".to_string(), Duration::from_millis(500))
            .await
            .unwrap();
        backend.set("b", "2".to_string(), Duration::ZERO).await.unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(backend.len(), 2);

        assert_eq!(backend.get("a").await.unwrap(), None);
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.get("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_refreshes_expiry() {
        let backend = MemoryBackend::new();
        backend
            .set("k", "old".to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(800)).await;
        backend
            .set("k", "new".to_string(), Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(800)).await;

        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("new"));
    }
}
