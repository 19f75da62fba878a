//! Mastery to readiness bands, and the per-turn readiness snapshot.

use std::collections::HashMap;

use futures::future::join_all;

use super::mastery::{apply_delta, BASELINE_MASTERY};
use super::types::{
    ConceptReadiness, MasteryUpdate, OverallReadiness, ReadinessLevel, ReadinessSnapshot,
};
use crate::services::store::PersistentStore;

pub fn classify(mastery: f64) -> ReadinessLevel {
    if mastery < 30.0 {
        ReadinessLevel::ReviewPrerequisites
    } else if mastery < 50.0 {
        ReadinessLevel::NeedsReinforcement
    } else if mastery < 70.0 {
        ReadinessLevel::AlmostReady
    } else {
        ReadinessLevel::Ready
    }
}

/// Worst level wins. An empty input yields `Unknown`.
pub fn aggregate<I>(levels: I) -> OverallReadiness
where
    I: IntoIterator<Item = ReadinessLevel>,
{
    levels
        .into_iter()
        .min()
        .map(OverallReadiness::from)
        .unwrap_or(OverallReadiness::Unknown)
}

/// Builds a snapshot from already-loaded scores.
///
/// Concepts with a pending update start from the score that update was
/// computed against, so a write dispatched earlier in the turn can never be
/// counted twice. Concepts that only appear in `pending` are included too.
pub fn build_snapshot(
    concept_ids: &[String],
    persisted: &HashMap<String, f64>,
    pending: &[MasteryUpdate],
) -> ReadinessSnapshot {
    let mut ordered: Vec<&str> = Vec::with_capacity(concept_ids.len() + pending.len());
    for id in concept_ids
        .iter()
        .map(String::as_str)
        .chain(pending.iter().map(|u| u.concept_id.as_str()))
    {
        if !ordered.contains(&id) {
            ordered.push(id);
        }
    }

    let concepts: Vec<ConceptReadiness> = ordered
        .into_iter()
        .map(|id| {
            let mut updates = pending.iter().filter(|u| u.concept_id == id).peekable();
            let mastery = match updates.peek() {
                Some(first) => {
                    let start = first.previous;
                    let delta: f64 = updates.map(|u| u.delta).sum();
                    apply_delta(start, delta)
                }
                None => apply_delta(
                    persisted.get(id).copied().unwrap_or(BASELINE_MASTERY),
                    0.0,
                ),
            };
            ConceptReadiness {
                concept_id: id.to_string(),
                mastery,
                level: classify(mastery),
            }
        })
        .collect();

    let overall = aggregate(concepts.iter().map(|c| c.level));
    let (average_mastery, minimum_mastery) = if concepts.is_empty() {
        (0.0, 0.0)
    } else {
        let sum: f64 = concepts.iter().map(|c| c.mastery).sum();
        let min = concepts
            .iter()
            .map(|c| c.mastery)
            .fold(f64::INFINITY, f64::min);
        (sum / concepts.len() as f64, min)
    };

    ReadinessSnapshot {
        concepts,
        overall,
        average_mastery,
        minimum_mastery,
    }
}

/// Loads persisted mastery for every concept without a pending update and
/// builds the snapshot. Unreadable scores count as the baseline.
pub async fn compute_snapshot(
    store: &dyn PersistentStore,
    learner_id: &str,
    concept_ids: &[String],
    pending: &[MasteryUpdate],
) -> ReadinessSnapshot {
    let reads = concept_ids
        .iter()
        .filter(|id| !pending.iter().any(|u| &u.concept_id == *id))
        .map(|id| async move { (id, store.get_mastery(learner_id, id).await) });

    let mut persisted = HashMap::new();
    for (id, read) in join_all(reads).await {
        match read {
            Ok(Some(score)) => {
                persisted.insert(id.clone(), score);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    learner_id,
                    concept_id = %id,
                    "mastery read failed, using baseline"
                );
            }
        }
    }
    build_snapshot(concept_ids, &persisted, pending)
}
