//! No-repeat concept rotation per (learner, topic).
//!
//! The shown-set lives in the cache under `rotation:{learner}:{topic}`.
//! Updates are read-modify-replace on one key; concurrent turns for the same
//! pair may interleave, which at worst repeats a concept early.

use std::collections::BTreeSet;
use std::time::Duration;

use crate::cache::{keys, Cache};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPick {
    pub concept_id: String,
    /// True when this pick completed the cycle and the shown-set was cleared.
    pub reset: bool,
}

#[derive(Clone)]
pub struct RotationStore {
    cache: Cache,
    ttl: Duration,
}

impl RotationStore {
    pub fn new(cache: Cache, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub async fn shown(&self, learner_id: &str, topic_id: &str) -> BTreeSet<String> {
        self.cache
            .get::<BTreeSet<String>>(&keys::rotation_key(learner_id, topic_id))
            .await
            .unwrap_or_default()
    }

    pub async fn clear(&self, learner_id: &str, topic_id: &str) {
        self.cache
            .delete(&keys::rotation_key(learner_id, topic_id))
            .await;
    }

    /// Picks the first canonical id among `candidates` not yet shown.
    ///
    /// `topic_concepts` defines the full cycle; ids are canonicalised by
    /// sorting. An empty `candidates` slice means "any topic concept". When
    /// every candidate was already shown the first candidate repeats, since a
    /// targeted pick outranks novelty. Returns `None` for an empty topic.
    pub async fn next(
        &self,
        learner_id: &str,
        topic_id: &str,
        topic_concepts: &[String],
        candidates: &[String],
    ) -> Option<RotationPick> {
        let canonical: BTreeSet<String> = topic_concepts.iter().cloned().collect();
        if canonical.is_empty() {
            return None;
        }

        let key = keys::rotation_key(learner_id, topic_id);
        let mut shown: BTreeSet<String> = self
            .cache
            .get::<BTreeSet<String>>(&key)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|id| canonical.contains(id))
            .collect();

        let eligible: Vec<&String> = if candidates.is_empty() {
            canonical.iter().collect()
        } else {
            canonical
                .iter()
                .filter(|id| candidates.contains(*id))
                .collect()
        };
        let first = *eligible.first()?;

        let chosen = eligible
            .iter()
            .find(|id| !shown.contains(id.as_str()))
            .copied()
            .unwrap_or(first)
            .clone();

        shown.insert(chosen.clone());
        let reset = shown == canonical;
        if reset {
            self.cache.delete(&key).await;
        } else {
            self.cache.set(&key, &shown, self.ttl).await;
        }

        tracing::debug!(
            learner_id,
            topic_id,
            concept_id = %chosen,
            shown = shown.len(),
            reset,
            "rotation pick"
        );

        Some(RotationPick {
            concept_id: chosen,
            reset,
        })
    }
}
