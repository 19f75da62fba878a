#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tutor_pipeline::cache::Cache;
use tutor_pipeline::config::TutorConfig;
use tutor_pipeline::core::{StepMetricsRegistry, TelemetrySink};
use tutor_pipeline::pipeline::{PipelineDeps, TurnPipeline};
use tutor_pipeline::services::{
    CollaboratorError, ConceptFilter, ContentGenerator, Generation, GenerationContext,
    InMemoryKnowledgeBase, InMemoryStore, KnowledgeRetriever, PersistentStore, QualityClassifier,
    TutorService, UsageMetadata,
};
use tutor_pipeline::tutor::types::{Concept, ConceptRelations, QualityLabel};

pub const TOPIC: &str = "fractions";

/// Topic with three concepts; a message mentioning "numerator" matches only `frac-a`.
pub fn fractions_kb() -> InMemoryKnowledgeBase {
    let mut kb = InMemoryKnowledgeBase::new();
    kb.add_topic(
        TOPIC,
        "A fraction names a part of a whole.",
        vec![
            concept("frac-a", "Numerator"),
            concept("frac-b", "Denominator"),
            concept("frac-c", "Equivalent fractions"),
        ],
    );
    kb
}

/// [`fractions_kb`] where the denominator leads on to the numerator.
pub fn fractions_kb_with_graph() -> InMemoryKnowledgeBase {
    let mut kb = fractions_kb();
    kb.set_relations(
        "frac-b",
        ConceptRelations {
            prerequisites: Vec::new(),
            next: vec!["frac-a".to_string()],
        },
    );
    kb
}

fn concept(id: &str, name: &str) -> Concept {
    Concept {
        id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
    }
}

pub fn test_config() -> TutorConfig {
    TutorConfig {
        lookup_timeout: Duration::from_millis(500),
        classify_timeout: Duration::from_millis(500),
        generation_timeout: Duration::from_millis(500),
        step_timeout: Duration::from_secs(2),
        turn_timeout: Duration::from_secs(5),
        ..TutorConfig::default()
    }
}

pub struct EchoGenerator;

#[async_trait]
impl ContentGenerator for EchoGenerator {
    async fn generate(
        &self,
        message: &str,
        context: &GenerationContext,
    ) -> Result<Generation, CollaboratorError> {
        Ok(Generation {
            text: format!("[{}] {}", context.style.as_str(), message),
            usage: UsageMetadata {
                model: Some("echo".to_string()),
                ..UsageMetadata::default()
            },
        })
    }

    async fn summarize(&self, history: &str, max_chars: usize) -> Result<String, CollaboratorError> {
        Ok(format!("summary of {} chars", history.chars().count())
            .chars()
            .take(max_chars)
            .collect())
    }
}

pub struct SlowGenerator(pub Duration);

#[async_trait]
impl ContentGenerator for SlowGenerator {
    async fn generate(
        &self,
        _message: &str,
        _context: &GenerationContext,
    ) -> Result<Generation, CollaboratorError> {
        tokio::time::sleep(self.0).await;
        Ok(Generation {
            text: "too late".to_string(),
            usage: UsageMetadata::default(),
        })
    }
}

pub struct ScriptedClassifier(pub QualityLabel);

#[async_trait]
impl QualityClassifier for ScriptedClassifier {
    async fn classify(&self, _message: &str) -> Result<QualityLabel, CollaboratorError> {
        Ok(self.0)
    }
}

pub struct FailingClassifier;

#[async_trait]
impl QualityClassifier for FailingClassifier {
    async fn classify(&self, _message: &str) -> Result<QualityLabel, CollaboratorError> {
        Err(CollaboratorError::Unavailable("classifier offline".to_string()))
    }
}

pub struct PanickingRetriever;

#[async_trait]
impl KnowledgeRetriever for PanickingRetriever {
    async fn retrieve_concepts(
        &self,
        _query: &str,
        _filter: &ConceptFilter,
    ) -> Result<Vec<Concept>, CollaboratorError> {
        panic!("index corrupted")
    }

    async fn retrieve_content(&self, _topic_id: &str) -> Result<String, CollaboratorError> {
        panic!("index corrupted")
    }

    async fn concept_relations(&self, _concept_id: &str) -> Result<ConceptRelations, CollaboratorError> {
        panic!("index corrupted")
    }
}

pub struct Harness {
    pub service: TutorService,
    pub store: Arc<InMemoryStore>,
    pub metrics: Arc<StepMetricsRegistry>,
}

pub fn harness(
    generator: Arc<dyn ContentGenerator>,
    retriever: Arc<dyn KnowledgeRetriever>,
    classifier: Arc<dyn QualityClassifier>,
) -> Harness {
    harness_with_config(test_config(), generator, retriever, classifier)
}

pub fn harness_with_config(
    config: TutorConfig,
    generator: Arc<dyn ContentGenerator>,
    retriever: Arc<dyn KnowledgeRetriever>,
    classifier: Arc<dyn QualityClassifier>,
) -> Harness {
    build_harness(config, generator, retriever, classifier, true)
}

/// Same wiring as [`harness`] but with no telemetry sink attached.
pub fn harness_without_telemetry(
    generator: Arc<dyn ContentGenerator>,
    retriever: Arc<dyn KnowledgeRetriever>,
    classifier: Arc<dyn QualityClassifier>,
) -> Harness {
    build_harness(test_config(), generator, retriever, classifier, false)
}

fn build_harness(
    config: TutorConfig,
    generator: Arc<dyn ContentGenerator>,
    retriever: Arc<dyn KnowledgeRetriever>,
    classifier: Arc<dyn QualityClassifier>,
    with_telemetry: bool,
) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let metrics = Arc::new(StepMetricsRegistry::new());
    let telemetry = with_telemetry.then(|| Arc::clone(&metrics) as Arc<dyn TelemetrySink>);
    let deps = PipelineDeps {
        generator,
        retriever,
        classifier,
        store: Arc::clone(&store) as Arc<dyn PersistentStore>,
        telemetry,
    };
    let pipeline = TurnPipeline::new(config, deps, Cache::in_memory());
    Harness {
        service: TutorService::new(pipeline).with_metrics(Arc::clone(&metrics)),
        store,
        metrics,
    }
}

pub fn default_harness(label: QualityLabel) -> Harness {
    harness(
        Arc::new(EchoGenerator),
        Arc::new(fractions_kb()),
        Arc::new(ScriptedClassifier(label)),
    )
}
