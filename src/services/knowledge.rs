use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::CollaboratorError;
use crate::tutor::types::{Concept, ConceptRelations};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConceptFilter {
    pub topic_id: Option<String>,
    pub limit: Option<usize>,
}

impl ConceptFilter {
    pub fn topic(topic_id: impl Into<String>) -> Self {
        Self {
            topic_id: Some(topic_id.into()),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Knowledge lookup. Empty results are valid outcomes, not errors.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// An empty query returns every concept passing the filter.
    async fn retrieve_concepts(
        &self,
        query: &str,
        filter: &ConceptFilter,
    ) -> Result<Vec<Concept>, CollaboratorError>;

    async fn retrieve_content(&self, topic_id: &str) -> Result<String, CollaboratorError>;

    async fn concept_relations(&self, _concept_id: &str) -> Result<ConceptRelations, CollaboratorError> {
        Ok(ConceptRelations::default())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ConceptEntry {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    prerequisites: Vec<String>,
    #[serde(default)]
    next: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TopicEntry {
    id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    concepts: Vec<ConceptEntry>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct KnowledgeFile {
    #[serde(default)]
    topics: Vec<TopicEntry>,
}

/// Knowledge base held in memory, loadable from a JSON document:
///
/// ```json
/// {"topics": [{"id": "fractions", "content": "...",
///   "concepts": [{"id": "f1", "name": "Numerator", "description": "...",
///                 "prerequisites": [], "next": ["f2"]}]}]}
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryKnowledgeBase {
    topics: HashMap<String, TopicEntry>,
}

impl InMemoryKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(raw: &str) -> Result<Self, CollaboratorError> {
        let file: KnowledgeFile = serde_json::from_str(raw)?;
        Ok(Self {
            topics: file
                .topics
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect(),
        })
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CollaboratorError> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_json(&raw)
    }

    pub fn add_topic(&mut self, topic_id: &str, content: &str, concepts: Vec<Concept>) {
        let entries = concepts
            .into_iter()
            .map(|c| ConceptEntry {
                id: c.id,
                name: c.name,
                description: c.description,
                prerequisites: Vec::new(),
                next: Vec::new(),
            })
            .collect();
        self.topics.insert(
            topic_id.to_string(),
            TopicEntry {
                id: topic_id.to_string(),
                content: content.to_string(),
                concepts: entries,
            },
        );
    }

    pub fn set_relations(&mut self, concept_id: &str, relations: ConceptRelations) {
        for topic in self.topics.values_mut() {
            if let Some(entry) = topic.concepts.iter_mut().find(|c| c.id == concept_id) {
                entry.prerequisites = relations.prerequisites.clone();
                entry.next = relations.next.clone();
            }
        }
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    fn concept_entries<'a>(
        &'a self,
        filter: &'a ConceptFilter,
    ) -> impl Iterator<Item = &'a ConceptEntry> + 'a {
        self.topics
            .values()
            .filter(move |t| filter.topic_id.as_ref().map_or(true, |id| &t.id == id))
            .flat_map(|t| t.concepts.iter())
    }
}

fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

fn match_score(entry: &ConceptEntry, lowered_query: &str, terms: &[String]) -> usize {
    let name = entry.name.to_lowercase();
    let mut score = 0;
    if !name.is_empty() && lowered_query.contains(&name) {
        score += 10;
    }
    let name_terms = query_terms(&name);
    score += terms.iter().filter(|t| name_terms.contains(t)).count();
    score
}

#[async_trait]
impl KnowledgeRetriever for InMemoryKnowledgeBase {
    async fn retrieve_concepts(
        &self,
        query: &str,
        filter: &ConceptFilter,
    ) -> Result<Vec<Concept>, CollaboratorError> {
        let query = query.trim();
        let mut scored: Vec<(usize, &ConceptEntry)> = if query.is_empty() {
            self.concept_entries(filter).map(|e| (0, e)).collect()
        } else {
            let lowered = query.to_lowercase();
            let terms = query_terms(query);
            self.concept_entries(filter)
                .map(|e| (match_score(e, &lowered, &terms), e))
                .filter(|(score, _)| *score > 0)
                .collect()
        };

        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        let limit = filter.limit.unwrap_or(usize::MAX);

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, e)| Concept {
                id: e.id.clone(),
                name: e.name.clone(),
                description: e.description.clone(),
            })
            .collect())
    }

    async fn retrieve_content(&self, topic_id: &str) -> Result<String, CollaboratorError> {
        Ok(self
            .topics
            .get(topic_id)
            .map(|t| t.content.clone())
            .unwrap_or_default())
    }

    async fn concept_relations(&self, concept_id: &str) -> Result<ConceptRelations, CollaboratorError> {
        let relations = self
            .topics
            .values()
            .flat_map(|t| t.concepts.iter())
            .find(|c| c.id == concept_id)
            .map(|c| ConceptRelations {
                prerequisites: c.prerequisites.clone(),
                next: c.next.clone(),
            })
            .unwrap_or_default();
        Ok(relations)
    }
}
