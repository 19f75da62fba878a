//! Bounded recent-turn memory per conversation, stored through the cache.

use std::time::Duration;

use super::types::MemoryTurn;
use crate::cache::{keys, Cache};

#[derive(Clone)]
pub struct SessionMemory {
    cache: Cache,
    capacity: usize,
    ttl: Duration,
}

impl SessionMemory {
    pub fn new(cache: Cache, capacity: usize, ttl: Duration) -> Self {
        Self {
            cache,
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub async fn recent(&self, conversation_id: &str) -> Vec<MemoryTurn> {
        self.cache
            .get::<Vec<MemoryTurn>>(&keys::session_key(conversation_id))
            .await
            .unwrap_or_default()
    }

    /// Appends and trims to capacity, replacing the whole entry.
    pub async fn append(&self, conversation_id: &str, turn: MemoryTurn) {
        let key = keys::session_key(conversation_id);
        let mut turns = self
            .cache
            .get::<Vec<MemoryTurn>>(&key)
            .await
            .unwrap_or_default();
        turns.push(turn);
        if turns.len() > self.capacity {
            let excess = turns.len() - self.capacity;
            turns.drain(..excess);
        }
        self.cache.set(&key, &turns, self.ttl).await;
    }

    pub async fn clear(&self, conversation_id: &str) {
        self.cache
            .delete(&keys::session_key(conversation_id))
            .await;
    }
}

/// Plain-text transcript used as generation context.
pub fn render_history(turns: &[MemoryTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("Learner: {}\nTutor: {}", t.message, t.response))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keeps the newest turns whose rendered text fits in `max_chars`,
/// shortening the oldest kept turn on a char boundary when needed.
pub fn truncate_history(turns: &[MemoryTurn], max_chars: usize) -> String {
    let mut kept: Vec<String> = Vec::new();
    let mut used = 0usize;

    for turn in turns.iter().rev() {
        let block = render_history(std::slice::from_ref(turn));
        let len = block.chars().count() + usize::from(!kept.is_empty());
        if used + len <= max_chars {
            used += len;
            kept.push(block);
            continue;
        }
        let remaining = max_chars.saturating_sub(used + usize::from(!kept.is_empty()));
        if remaining > 0 {
            let skip = block.chars().count() - remaining;
            kept.push(block.chars().skip(skip).collect());
        }
        break;
    }

    kept.reverse();
    kept.join("\n")
}
