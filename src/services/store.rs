//! Persistent store boundary.
//!
//! The core only needs keyed upserts that are eventually durable: mastery and
//! weakness by (learner, concept), messages by (conversation, sequence),
//! trend points by (learner, concept, recorded_at).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::CollaboratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    Learner,
    Tutor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub conversation_id: String,
    pub sequence: i64,
    pub trace_id: String,
    pub learner_id: String,
    pub topic_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryRecord {
    pub learner_id: String,
    pub concept_id: String,
    pub score: f64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendRecord {
    pub learner_id: String,
    pub concept_id: String,
    pub score: f64,
    pub delta: f64,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaknessRecord {
    pub learner_id: String,
    pub concept_id: String,
    pub label: String,
    pub score: f64,
    pub occurrences: u32,
    pub last_seen_at: DateTime<Utc>,
}

#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get_mastery(
        &self,
        learner_id: &str,
        concept_id: &str,
    ) -> Result<Option<f64>, CollaboratorError>;

    async fn upsert_mastery(&self, record: MasteryRecord) -> Result<(), CollaboratorError>;

    async fn upsert_message(&self, record: MessageRecord) -> Result<(), CollaboratorError>;

    async fn insert_trend(&self, record: TrendRecord) -> Result<(), CollaboratorError>;

    /// Bumps `occurrences` when a record already exists for the pair.
    async fn upsert_weakness(&self, record: WeaknessRecord) -> Result<(), CollaboratorError>;
}

#[derive(Default)]
pub struct InMemoryStore {
    mastery: RwLock<HashMap<(String, String), MasteryRecord>>,
    messages: RwLock<HashMap<(String, i64), MessageRecord>>,
    trends: RwLock<HashMap<(String, String, i64), TrendRecord>>,
    weaknesses: RwLock<HashMap<(String, String), WeaknessRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mastery_records(&self) -> Vec<MasteryRecord> {
        let mut records: Vec<_> = self.mastery.read().values().cloned().collect();
        records.sort_by(|a, b| a.concept_id.cmp(&b.concept_id));
        records
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<MessageRecord> {
        let mut records: Vec<_> = self
            .messages
            .read()
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        records.sort_by_key(|m| m.sequence);
        records
    }

    pub fn trends(&self, learner_id: &str, concept_id: &str) -> Vec<TrendRecord> {
        let mut records: Vec<_> = self
            .trends
            .read()
            .values()
            .filter(|t| t.learner_id == learner_id && t.concept_id == concept_id)
            .cloned()
            .collect();
        records.sort_by_key(|t| t.recorded_at);
        records
    }

    pub fn weakness(&self, learner_id: &str, concept_id: &str) -> Option<WeaknessRecord> {
        self.weaknesses
            .read()
            .get(&(learner_id.to_string(), concept_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn get_mastery(
        &self,
        learner_id: &str,
        concept_id: &str,
    ) -> Result<Option<f64>, CollaboratorError> {
        Ok(self
            .mastery
            .read()
            .get(&(learner_id.to_string(), concept_id.to_string()))
            .map(|r| r.score))
    }

    async fn upsert_mastery(&self, record: MasteryRecord) -> Result<(), CollaboratorError> {
        let key = (record.learner_id.clone(), record.concept_id.clone());
        self.mastery.write().insert(key, record);
        Ok(())
    }

    async fn upsert_message(&self, record: MessageRecord) -> Result<(), CollaboratorError> {
        let key = (record.conversation_id.clone(), record.sequence);
        self.messages.write().insert(key, record);
        Ok(())
    }

    async fn insert_trend(&self, record: TrendRecord) -> Result<(), CollaboratorError> {
        let key = (
            record.learner_id.clone(),
            record.concept_id.clone(),
            record.recorded_at.timestamp_micros(),
        );
        self.trends.write().insert(key, record);
        Ok(())
    }

    async fn upsert_weakness(&self, record: WeaknessRecord) -> Result<(), CollaboratorError> {
        let key = (record.learner_id.clone(), record.concept_id.clone());
        let mut weaknesses = self.weaknesses.write();
        match weaknesses.get_mut(&key) {
            Some(existing) => {
                existing.occurrences += record.occurrences.max(1);
                existing.label = record.label;
                existing.score = record.score;
                existing.last_seen_at = record.last_seen_at;
            }
            None => {
                weaknesses.insert(key, record);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mastery_upsert_replaces() {
        let store = InMemoryStore::new();
        assert_eq!(store.get_mastery("u1", "a").await.unwrap(), None);

        for score in [55.0, 61.0] {
            store
                .upsert_mastery(MasteryRecord {
                    learner_id: "u1".to_string(),
                    concept_id: "a".to_string(),
                    score,
                    updated_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        assert_eq!(store.get_mastery("u1", "a").await.unwrap(), Some(61.0));
        assert_eq!(store.mastery_records().len(), 1);
    }

    #[tokio::test]
    async fn weakness_counts_occurrences() {
        let store = InMemoryStore::new();
        let record = WeaknessRecord {
            learner_id: "u1".to_string(),
            concept_id: "a".to_string(),
            label: "wrong".to_string(),
            score: 45.0,
            occurrences: 1,
            last_seen_at: Utc::now(),
        };
        store.upsert_weakness(record.clone()).await.unwrap();
        store
            .upsert_weakness(WeaknessRecord {
                label: "misconception".to_string(),
                score: 37.0,
                ..record
            })
            .await
            .unwrap();

        let stored = store.weakness("u1", "a").unwrap();
        assert_eq!(stored.occurrences, 2);
        assert_eq!(stored.label, "misconception");
        assert_eq!(stored.score, 37.0);
    }

    #[tokio::test]
    async fn messages_are_keyed_by_sequence() {
        let store = InMemoryStore::new();
        let base = MessageRecord {
            conversation_id: "conv-1".to_string(),
            sequence: 2,
            trace_id: "t".to_string(),
            learner_id: "u1".to_string(),
            topic_id: "topic".to_string(),
            role: MessageRole::Tutor,
            content: "answer".to_string(),
            label: None,
            created_at: Utc::now(),
        };
        store.upsert_message(base.clone()).await.unwrap();
        store
            .upsert_message(MessageRecord {
                sequence: 1,
                role: MessageRole::Learner,
                content: "question".to_string(),
                ..base.clone()
            })
            .await
            .unwrap();
        store.upsert_message(base).await.unwrap();

        let messages = store.messages("conv-1");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::Learner);
    }
}
