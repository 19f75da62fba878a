mod common;

use common::*;
use tutor_pipeline::cache::{keys, Cache};
use tutor_pipeline::tutor::types::{PathDecisionKind, QualityLabel};
use tutor_pipeline::tutor::{ConceptGraph, LearningPathEngine, RotationStore};
use tutor_pipeline::TurnRequest;

fn ids(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn rotation_covers_topic_before_repeating() {
    let engine = LearningPathEngine::new(RotationStore::new(Cache::in_memory(), keys::ROTATION_TTL));
    let concepts = ids(&["3", "1", "2"]);
    let graph = ConceptGraph::new();

    let mut picks = Vec::new();
    for _ in 0..3 {
        let decision = engine
            .decide("learner", "topic", None, &concepts, &graph)
            .await;
        assert_eq!(decision.decision, PathDecisionKind::LearnNextConcept);
        picks.push(decision.recommended_concept_id.expect("a pick"));
    }
    assert_eq!(picks, ids(&["1", "2", "3"]));

    let fourth = engine
        .decide("learner", "topic", None, &concepts, &graph)
        .await;
    assert_eq!(fourth.recommended_concept_id.as_deref(), Some("1"));
}

#[tokio::test]
async fn rotation_is_per_learner_and_topic() {
    let engine = LearningPathEngine::new(RotationStore::new(Cache::in_memory(), keys::ROTATION_TTL));
    let concepts = ids(&["a", "b"]);
    let graph = ConceptGraph::new();

    let first = engine.decide("u1", "t1", None, &concepts, &graph).await;
    let other_learner = engine.decide("u2", "t1", None, &concepts, &graph).await;
    let other_topic = engine.decide("u1", "t2", None, &concepts, &graph).await;

    assert_eq!(first.recommended_concept_id, other_learner.recommended_concept_id);
    assert_eq!(first.recommended_concept_id, other_topic.recommended_concept_id);
}

#[tokio::test]
async fn successive_turns_recommend_distinct_concepts() {
    let h = default_harness(QualityLabel::Correct);

    let mut recommended = Vec::new();
    for _ in 0..3 {
        let response = h
            .service
            .process_turn(TurnRequest::new("learner-r", TOPIC, "How does the numerator work here?"))
            .await;
        h.service.shutdown().await;
        recommended.push(response.recommended_concept_id.expect("a recommendation"));
    }

    recommended.sort();
    recommended.dedup();
    assert_eq!(recommended.len(), 3);
}
