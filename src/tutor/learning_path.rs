//! Next-step decision from readiness and concept relationships.
//!
//! Resolution against the aggregated level:
//!
//! | overall              | graph data                 | decision              |
//! |----------------------|----------------------------|-----------------------|
//! | (no topic concepts)  | -                          | `explore_topic`       |
//! | unknown / missing    | -                          | `learn_next_concept`  |
//! | review_prerequisites | prerequisite of focus      | `review_prerequisite` |
//! | review_prerequisites | none                       | `reinforce`           |
//! | needs_reinforcement  | -                          | `reinforce`           |
//! | almost_ready         | next of focus              | `learn_next_concept`  |
//! | almost_ready         | none                       | `reinforce`           |
//! | ready                | -                          | `advance`             |
//!
//! The focus concept is the weakest one in the snapshot. Every pick from
//! the topic's own concepts goes through [`RotationStore`]: graph successors
//! inside the topic are preferred while unshown, then the rotation moves on
//! to the rest of the topic. A successor outside the topic is only returned
//! when the focus has no in-topic successor at all.

use std::collections::HashMap;

use super::rotation::{RotationPick, RotationStore};
use super::types::{
    ConceptRelations, DecisionDetails, OverallReadiness, PathDecision, PathDecisionKind,
    ReadinessLevel, ReadinessSnapshot,
};

/// Relations fetched for the concepts a decision may consult.
#[derive(Debug, Clone, Default)]
pub struct ConceptGraph {
    relations: HashMap<String, ConceptRelations>,
}

impl ConceptGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, concept_id: impl Into<String>, relations: ConceptRelations) {
        self.relations.insert(concept_id.into(), relations);
    }

    pub fn is_empty(&self) -> bool {
        self.relations.values().all(ConceptRelations::is_empty)
    }

    pub fn prerequisite_of(&self, concept_id: &str) -> Option<&str> {
        self.relations
            .get(concept_id)?
            .prerequisites
            .iter()
            .find(|id| id.as_str() != concept_id)
            .map(String::as_str)
    }

    /// Concepts that follow `concept_id`, in graph order, without self-loops.
    pub fn next_ids(&self, concept_id: &str) -> Vec<&str> {
        self.relations
            .get(concept_id)
            .map(|r| {
                r.next
                    .iter()
                    .map(String::as_str)
                    .filter(|id| *id != concept_id)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Weakest concept, ties broken by id so the choice is stable.
pub fn focus_concept(snapshot: &ReadinessSnapshot) -> Option<&str> {
    snapshot
        .concepts
        .iter()
        .min_by(|a, b| {
            a.mastery
                .total_cmp(&b.mastery)
                .then_with(|| a.concept_id.cmp(&b.concept_id))
        })
        .map(|c| c.concept_id.as_str())
}

/// Topic concepts sitting at the snapshot's worst level.
fn weakest_candidates(
    snapshot: &ReadinessSnapshot,
    level: ReadinessLevel,
    concept_ids: &[String],
) -> Vec<String> {
    snapshot
        .concepts
        .iter()
        .filter(|c| c.level == level && concept_ids.contains(&c.concept_id))
        .map(|c| c.concept_id.clone())
        .collect()
}

#[derive(Clone)]
pub struct LearningPathEngine {
    rotation: RotationStore,
}

impl LearningPathEngine {
    pub fn new(rotation: RotationStore) -> Self {
        Self { rotation }
    }

    pub fn rotation(&self) -> &RotationStore {
        &self.rotation
    }

    pub async fn decide(
        &self,
        learner_id: &str,
        topic_id: &str,
        snapshot: Option<&ReadinessSnapshot>,
        concept_ids: &[String],
        graph: &ConceptGraph,
    ) -> PathDecision {
        if concept_ids.is_empty() {
            return PathDecision {
                decision: PathDecisionKind::ExploreTopic,
                recommended_concept_id: None,
                details: DecisionDetails {
                    reason: "no concepts known for topic".to_string(),
                    readiness: snapshot.map(|s| s.overall).unwrap_or_default(),
                    focus_concept_id: None,
                    rotation_reset: false,
                },
            };
        }

        let Some((snapshot, level)) =
            snapshot.and_then(|s| s.overall.level().map(|level| (s, level)))
        else {
            return self
                .rotate(
                    learner_id,
                    topic_id,
                    concept_ids,
                    &[],
                    PathDecisionKind::LearnNextConcept,
                    "readiness unavailable, rotating through topic",
                    OverallReadiness::Unknown,
                    None,
                )
                .await;
        };

        let overall = snapshot.overall;
        let focus = focus_concept(snapshot).map(str::to_string);
        let focus_ref = focus.as_deref();

        match level {
            ReadinessLevel::ReviewPrerequisites => {
                if let Some(prereq) = focus_ref.and_then(|f| graph.prerequisite_of(f)) {
                    return fixed(
                        PathDecisionKind::ReviewPrerequisite,
                        prereq,
                        "mastery below prerequisite threshold",
                        overall,
                        focus.clone(),
                    );
                }
                let candidates = weakest_candidates(snapshot, level, concept_ids);
                self.rotate(
                    learner_id,
                    topic_id,
                    concept_ids,
                    &candidates,
                    PathDecisionKind::Reinforce,
                    "mastery very low and no prerequisite known",
                    overall,
                    focus.clone(),
                )
                .await
            }
            ReadinessLevel::NeedsReinforcement => {
                let candidates = weakest_candidates(snapshot, level, concept_ids);
                self.rotate(
                    learner_id,
                    topic_id,
                    concept_ids,
                    &candidates,
                    PathDecisionKind::Reinforce,
                    "weakest concepts need reinforcement",
                    overall,
                    focus.clone(),
                )
                .await
            }
            ReadinessLevel::AlmostReady => {
                if let Some(decision) = self
                    .follow_graph(
                        learner_id,
                        topic_id,
                        concept_ids,
                        graph,
                        PathDecisionKind::LearnNextConcept,
                        "almost ready, following concept graph",
                        overall,
                        focus.clone(),
                    )
                    .await
                {
                    return decision;
                }
                let candidates = weakest_candidates(snapshot, level, concept_ids);
                self.rotate(
                    learner_id,
                    topic_id,
                    concept_ids,
                    &candidates,
                    PathDecisionKind::Reinforce,
                    "almost ready, no graph data to advance along",
                    overall,
                    focus.clone(),
                )
                .await
            }
            ReadinessLevel::Ready => {
                if let Some(decision) = self
                    .follow_graph(
                        learner_id,
                        topic_id,
                        concept_ids,
                        graph,
                        PathDecisionKind::Advance,
                        "all concepts ready, advancing along concept graph",
                        overall,
                        focus.clone(),
                    )
                    .await
                {
                    return decision;
                }
                self.rotate(
                    learner_id,
                    topic_id,
                    concept_ids,
                    &[],
                    PathDecisionKind::Advance,
                    "all concepts ready",
                    overall,
                    focus.clone(),
                )
                .await
            }
        }
    }

    /// Recommends along the focus concept's `next` edges. In-topic
    /// successors not yet shown this cycle win; once all of them were shown
    /// the pick rotates through the remaining topic concepts. `None` when the
    /// focus has no successors.
    #[allow(clippy::too_many_arguments)]
    async fn follow_graph(
        &self,
        learner_id: &str,
        topic_id: &str,
        concept_ids: &[String],
        graph: &ConceptGraph,
        decision: PathDecisionKind,
        reason: &str,
        readiness: OverallReadiness,
        focus_concept_id: Option<String>,
    ) -> Option<PathDecision> {
        let next_ids = graph.next_ids(focus_concept_id.as_deref()?);
        let in_topic: Vec<String> = next_ids
            .iter()
            .filter(|id| concept_ids.iter().any(|c| c.as_str() == **id))
            .map(|id| id.to_string())
            .collect();

        if in_topic.is_empty() {
            let outside = next_ids.first()?;
            return Some(fixed(decision, outside, reason, readiness, focus_concept_id));
        }

        let shown = self.rotation.shown(learner_id, topic_id).await;
        let fresh: Vec<String> = in_topic
            .into_iter()
            .filter(|id| !shown.contains(id))
            .collect();
        let reason = if fresh.is_empty() {
            "concept graph already covered this cycle, rotating through topic"
        } else {
            reason
        };
        Some(
            self.rotate(
                learner_id,
                topic_id,
                concept_ids,
                &fresh,
                decision,
                reason,
                readiness,
                focus_concept_id,
            )
            .await,
        )
    }

    #[allow(clippy::too_many_arguments)]
    async fn rotate(
        &self,
        learner_id: &str,
        topic_id: &str,
        concept_ids: &[String],
        candidates: &[String],
        decision: PathDecisionKind,
        reason: &str,
        readiness: OverallReadiness,
        focus_concept_id: Option<String>,
    ) -> PathDecision {
        let pick = self
            .rotation
            .next(learner_id, topic_id, concept_ids, candidates)
            .await;
        let (recommended, rotation_reset) = match pick {
            Some(RotationPick { concept_id, reset }) => (Some(concept_id), reset),
            None => (None, false),
        };
        PathDecision {
            decision,
            recommended_concept_id: recommended,
            details: DecisionDetails {
                reason: reason.to_string(),
                readiness,
                focus_concept_id,
                rotation_reset,
            },
        }
    }
}

fn fixed(
    decision: PathDecisionKind,
    concept_id: &str,
    reason: &str,
    readiness: OverallReadiness,
    focus_concept_id: Option<String>,
) -> PathDecision {
    PathDecision {
        decision,
        recommended_concept_id: Some(concept_id.to_string()),
        details: DecisionDetails {
            reason: reason.to_string(),
            readiness,
            focus_concept_id,
            rotation_reset: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{keys, Cache};
    use crate::tutor::readiness::build_snapshot;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn engine() -> LearningPathEngine {
        LearningPathEngine::new(RotationStore::new(Cache::in_memory(), keys::ROTATION_TTL))
    }

    fn snapshot(scores: &[(&str, f64)]) -> ReadinessSnapshot {
        let persisted: HashMap<String, f64> =
            scores.iter().map(|(id, s)| (id.to_string(), *s)).collect();
        let concept_ids: Vec<String> = scores.iter().map(|(id, _)| id.to_string()).collect();
        build_snapshot(&concept_ids, &persisted, &[])
    }

    fn graph(concept: &str, prerequisites: &[&str], next: &[&str]) -> ConceptGraph {
        let mut graph = ConceptGraph::new();
        graph.insert(
            concept,
            ConceptRelations {
                prerequisites: ids(prerequisites),
                next: ids(next),
            },
        );
        graph
    }

    #[tokio::test]
    async fn no_concepts_means_explore() {
        let decision = engine()
            .decide("u1", "t1", None, &[], &ConceptGraph::new())
            .await;
        assert_eq!(decision.decision, PathDecisionKind::ExploreTopic);
        assert_eq!(decision.recommended_concept_id, None);
    }

    #[tokio::test]
    async fn missing_readiness_rotates_without_repeats() {
        let engine = engine();
        let topic = ids(&["1", "2", "3"]);
        let mut seen = Vec::new();
        for _ in 0..3 {
            let decision = engine
                .decide("u1", "t1", None, &topic, &ConceptGraph::new())
                .await;
            assert_eq!(decision.decision, PathDecisionKind::LearnNextConcept);
            seen.push(decision.recommended_concept_id.unwrap());
        }
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn unknown_snapshot_degrades_to_rotation() {
        let empty = ReadinessSnapshot::default();
        let decision = engine()
            .decide("u1", "t1", Some(&empty), &ids(&["a"]), &ConceptGraph::new())
            .await;
        assert_eq!(decision.decision, PathDecisionKind::LearnNextConcept);
        assert_eq!(decision.recommended_concept_id.as_deref(), Some("a"));
        assert_eq!(decision.details.readiness, OverallReadiness::Unknown);
    }

    #[tokio::test]
    async fn low_mastery_with_prerequisite_reviews_it() {
        let snap = snapshot(&[("b", 20.0), ("c", 80.0)]);
        let decision = engine()
            .decide("u1", "t1", Some(&snap), &ids(&["b", "c"]), &graph("b", &["a"], &[]))
            .await;
        assert_eq!(decision.decision, PathDecisionKind::ReviewPrerequisite);
        assert_eq!(decision.recommended_concept_id.as_deref(), Some("a"));
        assert_eq!(decision.details.focus_concept_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn low_mastery_without_graph_reinforces() {
        let snap = snapshot(&[("b", 20.0), ("c", 80.0)]);
        let decision = engine()
            .decide("u1", "t1", Some(&snap), &ids(&["b", "c"]), &ConceptGraph::new())
            .await;
        assert_eq!(decision.decision, PathDecisionKind::Reinforce);
        assert_eq!(decision.recommended_concept_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn needs_reinforcement_targets_weakest() {
        let snap = snapshot(&[("a", 75.0), ("b", 40.0), ("c", 45.0)]);
        let engine = engine();
        let topic = ids(&["a", "b", "c"]);
        let first = engine
            .decide("u1", "t1", Some(&snap), &topic, &ConceptGraph::new())
            .await;
        let second = engine
            .decide("u1", "t1", Some(&snap), &topic, &ConceptGraph::new())
            .await;
        assert_eq!(first.decision, PathDecisionKind::Reinforce);
        assert_eq!(first.recommended_concept_id.as_deref(), Some("b"));
        assert_eq!(second.recommended_concept_id.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn almost_ready_follows_graph_next() {
        let snap = snapshot(&[("a", 60.0), ("b", 65.0)]);
        let decision = engine()
            .decide("u1", "t1", Some(&snap), &ids(&["a", "b"]), &graph("a", &[], &["b"]))
            .await;
        assert_eq!(decision.decision, PathDecisionKind::LearnNextConcept);
        assert_eq!(decision.recommended_concept_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn graph_successor_is_not_repeated_within_a_cycle() {
        let snap = snapshot(&[("a", 58.0), ("b", 50.0), ("c", 50.0)]);
        let engine = engine();
        let topic = ids(&["a", "b", "c"]);
        let graph = graph("b", &[], &["a"]);

        let mut picks = Vec::new();
        for _ in 0..3 {
            let decision = engine
                .decide("u1", "t1", Some(&snap), &topic, &graph)
                .await;
            assert_eq!(decision.decision, PathDecisionKind::LearnNextConcept);
            picks.push(decision.recommended_concept_id.unwrap());
        }
        assert_eq!(picks, vec!["a", "b", "c"]);
        assert!(engine.rotation().shown("u1", "t1").await.is_empty());
    }

    #[tokio::test]
    async fn graph_pick_is_recorded_in_rotation() {
        let snap = snapshot(&[("a", 60.0), ("b", 65.0)]);
        let engine = engine();
        engine
            .decide("u1", "t1", Some(&snap), &ids(&["a", "b", "c"]), &graph("a", &[], &["c", "b"]))
            .await;
        let shown = engine.rotation().shown("u1", "t1").await;
        assert_eq!(shown.into_iter().collect::<Vec<_>>(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn almost_ready_without_graph_reinforces() {
        let snap = snapshot(&[("a", 60.0), ("b", 65.0)]);
        let decision = engine()
            .decide("u1", "t1", Some(&snap), &ids(&["a", "b"]), &ConceptGraph::new())
            .await;
        assert_eq!(decision.decision, PathDecisionKind::Reinforce);
        assert_eq!(decision.recommended_concept_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn ready_advances() {
        let snap = snapshot(&[("a", 90.0), ("b", 85.0)]);
        let with_graph = engine()
            .decide("u1", "t1", Some(&snap), &ids(&["a", "b"]), &graph("b", &[], &["c"]))
            .await;
        assert_eq!(with_graph.decision, PathDecisionKind::Advance);
        assert_eq!(with_graph.recommended_concept_id.as_deref(), Some("c"));

        let without_graph = engine()
            .decide("u1", "t1", Some(&snap), &ids(&["a", "b"]), &ConceptGraph::new())
            .await;
        assert_eq!(without_graph.decision, PathDecisionKind::Advance);
        assert_eq!(without_graph.recommended_concept_id.as_deref(), Some("a"));
    }

    #[test]
    fn graph_ignores_self_references() {
        let graph = graph("a", &["a", "z"], &["a"]);
        assert_eq!(graph.prerequisite_of("a"), Some("z"));
        assert!(graph.next_ids("a").is_empty());
        assert!(graph.next_ids("missing").is_empty());
    }
}
