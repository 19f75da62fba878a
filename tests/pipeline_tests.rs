mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use tutor_pipeline::pipeline::{derive_conversation_id, FALLBACK_RESPONSE};
use tutor_pipeline::tutor::types::{OverallReadiness, PathDecisionKind, QualityLabel, ReadinessLevel};
use tutor_pipeline::TurnRequest;

const LEARNER: &str = "learner-new";

fn ask(message: &str) -> TurnRequest {
    TurnRequest::new(LEARNER, TOPIC, message)
}

#[tokio::test]
async fn new_learner_correct_answer_moves_mastery_and_rotates() {
    let h = default_harness(QualityLabel::Correct);
    let shown_before = h
        .service
        .pipeline()
        .engine()
        .rotation()
        .shown(LEARNER, TOPIC)
        .await;

    let response = h
        .service
        .process_turn(ask("How does the numerator work here?"))
        .await;

    assert_eq!(response.reasoning_label, QualityLabel::Correct);
    assert!(!response.degraded);
    assert_eq!(response.mastery_updates.len(), 1);
    let update = &response.mastery_updates[0];
    assert_eq!(update.concept_id, "frac-a");
    assert_eq!(update.previous, 50.0);
    assert!(update.delta > 0.0);
    assert_eq!(update.updated, 50.0 + update.delta);

    let readiness = response.readiness.as_ref().expect("readiness computed");
    assert_ne!(readiness.overall, OverallReadiness::Unknown);
    let a = readiness.concept("frac-a").expect("A in snapshot");
    assert_eq!(a.mastery, update.updated);
    assert_eq!(readiness.concepts.len(), 3);

    let recommended = response.recommended_concept_id.clone().expect("a concept");
    assert!(["frac-a", "frac-b", "frac-c"].contains(&recommended.as_str()));
    assert!(!shown_before.contains(&recommended));

    h.service.shutdown().await;
    let records = h.store.mastery_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].score, update.updated);
    assert_eq!(h.store.trends(LEARNER, "frac-a").len(), 1);
    assert_eq!(h.store.messages(&response.conversation_id).len(), 2);
}

#[tokio::test]
async fn failing_classifier_yields_neutral_turn() {
    let h = harness(
        Arc::new(EchoGenerator),
        Arc::new(fractions_kb()),
        Arc::new(FailingClassifier),
    );

    let response = h
        .service
        .process_turn(ask("How does the numerator work here?"))
        .await;

    assert!(!response.response.is_empty());
    assert_ne!(response.response, FALLBACK_RESPONSE);
    assert_eq!(response.reasoning_label, QualityLabel::Neutral);
    assert!(response.mastery_updates.is_empty());
    assert!(response.degraded);

    h.service.shutdown().await;
    assert!(h.store.mastery_records().is_empty());
}

#[tokio::test]
async fn panicking_retriever_never_blocks_a_response() {
    let h = harness(
        Arc::new(EchoGenerator),
        Arc::new(PanickingRetriever),
        Arc::new(ScriptedClassifier(QualityLabel::Correct)),
    );

    let response = h
        .service
        .process_turn(ask("How does the numerator work here?"))
        .await;

    assert!(!response.response.is_empty());
    assert_eq!(response.reasoning_label, QualityLabel::Neutral);
    assert!(response.mastery_updates.is_empty());
    assert!(response.degraded);
    let decision = response.decision.expect("decision still made");
    assert_eq!(decision.decision, PathDecisionKind::ExploreTopic);
}

#[tokio::test(start_paused = true)]
async fn slow_generator_falls_back_within_budget() {
    let mut config = test_config();
    config.generation_timeout = Duration::from_millis(200);
    let h = harness_with_config(
        config,
        Arc::new(SlowGenerator(Duration::from_secs(120))),
        Arc::new(fractions_kb()),
        Arc::new(ScriptedClassifier(QualityLabel::Partial)),
    );

    let started = tokio::time::Instant::now();
    let response = h
        .service
        .process_turn(ask("How does the numerator work here?"))
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(response.response, FALLBACK_RESPONSE);
    assert!(response.degraded);
    // the rest of the turn still ran
    assert_eq!(response.reasoning_label, QualityLabel::Partial);
    assert_eq!(response.mastery_updates.len(), 1);
}

#[tokio::test]
async fn missing_fields_return_fallback_shape() {
    let h = default_harness(QualityLabel::Correct);

    let response = h
        .service
        .process_turn(TurnRequest {
            learner_id: Some(LEARNER.to_string()),
            topic_id: Some(TOPIC.to_string()),
            ..TurnRequest::default()
        })
        .await;

    assert_eq!(response.response, FALLBACK_RESPONSE);
    assert_eq!(response.reasoning_label, QualityLabel::Neutral);
    assert!(response.degraded);
    assert!(response.decision.is_none());
    assert_eq!(response.conversation_id, derive_conversation_id(LEARNER, TOPIC));
}

#[tokio::test]
async fn conversation_id_is_stable_across_turns() {
    let h = default_harness(QualityLabel::Neutral);

    let first = h.service.process_turn(ask("hello")).await;
    let second = h.service.process_turn(ask("hello again")).await;

    assert_eq!(first.conversation_id, second.conversation_id);
    assert_ne!(first.trace_id, second.trace_id);
}

#[tokio::test]
async fn session_memory_feeds_the_next_turn() {
    let h = default_harness(QualityLabel::Neutral);

    let first = h.service.process_turn(ask("What is a denominator?")).await;
    h.service.shutdown().await;

    let remembered = h
        .service
        .pipeline()
        .session()
        .recent(&first.conversation_id)
        .await;
    assert_eq!(remembered.len(), 1);
    assert_eq!(remembered[0].message, "What is a denominator?");
    assert_eq!(remembered[0].response, first.response);
}

#[tokio::test]
async fn oversized_message_is_truncated_not_rejected() {
    let mut config = test_config();
    config.max_message_chars = 20;
    let h = harness_with_config(
        config,
        Arc::new(EchoGenerator),
        Arc::new(fractions_kb()),
        Arc::new(ScriptedClassifier(QualityLabel::Good)),
    );

    let long = "numerator ".repeat(50);
    let response = h.service.process_turn(ask(&long)).await;

    assert!(response.message_truncated);
    assert!(!response.degraded);
    assert_eq!(response.response, format!("[standard] {}", &long.trim()[..20]));
}

#[tokio::test]
async fn negative_delta_records_weakness() {
    let h = default_harness(QualityLabel::Misconception);

    let response = h
        .service
        .process_turn(ask("The numerator is always bigger"))
        .await;
    h.service.shutdown().await;

    assert_eq!(response.mastery_updates.len(), 1);
    assert!(response.mastery_updates[0].delta < 0.0);
    let weakness = h.store.weakness(LEARNER, "frac-a").expect("weakness recorded");
    assert_eq!(weakness.label, "misconception");
    assert_eq!(
        response.readiness.unwrap().concept("frac-a").unwrap().level,
        ReadinessLevel::NeedsReinforcement
    );
}

#[tokio::test]
async fn readiness_is_cached_and_metrics_recorded() {
    let h = default_harness(QualityLabel::Correct);

    let response = h
        .service
        .process_turn(ask("How does the numerator work here?"))
        .await;
    h.service.shutdown().await;

    let cached = h
        .service
        .cached_readiness(LEARNER, TOPIC)
        .await
        .expect("snapshot cached");
    assert_eq!(Some(cached), response.readiness);

    let metrics = h.service.metrics();
    assert_eq!(metrics.len(), 11);
    assert!(metrics.iter().all(|m| m.call_count == 1 && m.error_count == 0));
}

#[tokio::test]
async fn graph_recommendations_rotate_across_turns() {
    let h = harness(
        Arc::new(EchoGenerator),
        Arc::new(fractions_kb_with_graph()),
        Arc::new(ScriptedClassifier(QualityLabel::Correct)),
    );
    let rotation = h.service.pipeline().engine().rotation().clone();

    let mut recommended = Vec::new();
    for _ in 0..3 {
        let shown = rotation.shown(LEARNER, TOPIC).await;
        let response = h
            .service
            .process_turn(ask("How does the numerator work here?"))
            .await;
        let decision = response.decision.expect("decision made");
        assert_eq!(decision.decision, PathDecisionKind::LearnNextConcept);
        let id = response.recommended_concept_id.expect("a concept");
        assert!(!shown.contains(&id), "{id} repeated within the cycle");
        recommended.push(id);
    }

    assert_eq!(recommended[0], "frac-a");
    recommended.sort();
    recommended.dedup();
    assert_eq!(recommended.len(), 3);
}

#[tokio::test]
async fn telemetry_sink_does_not_change_the_turn() {
    let request = || TurnRequest {
        trace_id: Some("trace-fixed".to_string()),
        ..ask("How does the numerator work here?")
    };

    let with_sink = default_harness(QualityLabel::Correct);
    let without_sink = harness_without_telemetry(
        Arc::new(EchoGenerator),
        Arc::new(fractions_kb()),
        Arc::new(ScriptedClassifier(QualityLabel::Correct)),
    );

    let observed = with_sink.service.process_turn(request()).await;
    let silent = without_sink.service.process_turn(request()).await;
    assert_eq!(observed, silent);
    assert!(!silent.degraded);

    with_sink.service.shutdown().await;
    without_sink.service.shutdown().await;
    assert_eq!(with_sink.metrics.snapshot().len(), 11);
    assert!(without_sink.metrics.snapshot().is_empty());
    let scores = |h: &Harness| {
        h.store
            .mastery_records()
            .into_iter()
            .map(|r| (r.concept_id, r.score))
            .collect::<Vec<_>>()
    };
    assert_eq!(scores(&with_sink), scores(&without_sink));
}
